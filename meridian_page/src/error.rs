//! Errors raised by [`crate::block`]/[`crate::page`] access and by
//! [`crate::codec`] (de)serialization.

use snafu::Snafu;

/// The logical type a typed getter expected, for [`BlockError::TypeMismatch`].
pub type ExpectedType = &'static str;

/// Errors accessing a [`crate::block::Block`] or [`crate::page::Page`].
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum BlockError {
    /// A typed getter was called against a block encoding it does not
    /// apply to.
    #[snafu(display("type mismatch: expected {expected}, block holds {actual}"))]
    TypeMismatch {
        /// The type the caller asked for.
        expected: ExpectedType,
        /// The type the block actually holds.
        actual: ExpectedType,
    },

    /// A position index was out of `[0, positionCount)`, or a slice range
    /// fell outside the block/page bounds.
    #[snafu(display("position {position} out of range for block of {position_count} positions"))]
    IndexOutOfRange {
        /// The offending index.
        position: usize,
        /// The block's position count.
        position_count: usize,
    },

    /// A block was constructed (or deserialized) in a state that violates
    /// one of §3's invariants: null bitmap length, monotonic offsets, or
    /// dictionary ids out of range.
    #[snafu(display("malformed block: {reason}"))]
    MalformedBlock {
        /// Description of which invariant was violated.
        reason: String,
    },
}

/// The specific stage at which page deserialization failed, carried by
/// [`MalformedPage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedPageKind {
    /// The header's `positionCount`/size fields were internally
    /// inconsistent with the byte slice supplied.
    HeaderMismatch,
    /// A block-encoding tag byte did not match any known encoding.
    UnknownEncoding,
    /// The LZ4 decompression step failed or produced the wrong size.
    DecompressionFailed,
    /// The spill cipher failed to decrypt the payload.
    DecryptionFailed,
}

/// Errors from [`crate::codec::serialize`]/[`crate::codec::deserialize`].
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum MalformedPage {
    /// Deserialization failed; see `kind` for which stage.
    #[snafu(display("malformed page ({kind:?}): {reason}"))]
    Malformed {
        /// Which stage of deserialization failed.
        kind: MalformedPageKind,
        /// Human-readable detail.
        reason: String,
    },

    /// A block inside the page violated a `Block` invariant once decoded.
    #[snafu(display("malformed page: block error: {source}"))]
    Block {
        /// The underlying block error.
        source: BlockError,
    },
}

impl MalformedPage {
    pub(crate) fn header_mismatch(reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: MalformedPageKind::HeaderMismatch,
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_encoding(reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: MalformedPageKind::UnknownEncoding,
            reason: reason.into(),
        }
    }

    pub(crate) fn decompression_failed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: MalformedPageKind::DecompressionFailed,
            reason: reason.into(),
        }
    }

    pub(crate) fn decryption_failed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: MalformedPageKind::DecryptionFailed,
            reason: reason.into(),
        }
    }
}
