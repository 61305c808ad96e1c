//! The per-position null bitmap shared by every [`crate::block::Block`]
//! variant that supports nulls.

use std::sync::Arc;

/// A bit per logical position: `true` means null. Stored one byte per bit
/// rather than bit-packed — the core favors O(1) slicing and simple
/// encode/decode over minimal memory for this particular structure, since
/// the values themselves dominate retained size in practice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullMask {
    bits: Arc<Vec<bool>>,
}

impl NullMask {
    /// Construct a mask from an owned bit vector.
    pub fn new(bits: Vec<bool>) -> Self {
        Self {
            bits: Arc::new(bits),
        }
    }

    /// A mask with no null positions.
    pub fn all_valid(len: usize) -> Self {
        Self::new(vec![false; len])
    }

    /// Number of positions this mask covers.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether the mask covers zero positions.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Whether position `i` (absolute, not offset-relative) is null.
    pub fn is_null(&self, i: usize) -> bool {
        self.bits[i]
    }

    /// Whether any position in `[offset, offset+len)` is null.
    pub fn any_null_in_range(&self, offset: usize, len: usize) -> bool {
        self.bits[offset..offset + len].iter().any(|b| *b)
    }

    /// Number of bytes retained by the backing storage (one byte/position).
    pub fn retained_size(&self) -> u64 {
        self.bits.len() as u64
    }

    /// Build a new mask selecting non-contiguous `positions` out of this
    /// one, for [`crate::block::Block::copy_positions`].
    pub fn copy_positions(&self, positions: &[usize]) -> Self {
        Self::new(positions.iter().map(|&p| self.bits[p]).collect())
    }

    /// The mask's bits as a plain `Vec`, for [`crate::codec`].
    pub(crate) fn to_vec(&self) -> Vec<bool> {
        (*self.bits).clone()
    }
}
