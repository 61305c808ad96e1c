//! The error taxonomy shared by every component of the execution core.
//!
//! Operators, Tasks, the Stage Scheduler, and the Transaction Manager all
//! classify failures into the same four categories so that retry policy
//! (§4.9) and user-visible failure reporting (§7) can be implemented once
//! and reused everywhere, rather than each component inventing its own
//! error taxonomy that the scheduler would then have to translate.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::clone_on_ref_ptr
)]

use std::fmt;

/// Classification of a failure, used to decide retry eligibility.
///
/// User and External errors are never retried. Internal errors may be
/// retried at the stage level depending on the query's retry policy.
/// Insufficient-Resources errors may first trigger cooperative spill before
/// becoming a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// SQL syntax, type mismatch, access denied, division by zero, invalid
    /// argument — caused by the query or the caller, never retried.
    User,
    /// Memory-exceeded, too-many-tasks, queue-full, admission rejection.
    InsufficientResources,
    /// Invariant violations, codec corruption, scheduler bugs.
    Internal,
    /// Connector failure, network timeout, remote task lost.
    External,
}

impl ErrorCategory {
    /// Whether a failure of this category may ever be retried, independent
    /// of the query's configured [retry policy](ErrorCategory). User and
    /// External errors are excluded from retry entirely; see §4.8/§7.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Internal)
    }
}

/// The `errorType` surfaced to clients in a failed query's error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Maps from [`ErrorCategory::User`].
    UserError,
    /// Maps from [`ErrorCategory::InsufficientResources`].
    InsufficientResources,
    /// Maps from [`ErrorCategory::Internal`].
    InternalError,
    /// Maps from [`ErrorCategory::External`].
    External,
}

impl From<ErrorCategory> for ErrorType {
    fn from(c: ErrorCategory) -> Self {
        match c {
            ErrorCategory::User => Self::UserError,
            ErrorCategory::InsufficientResources => Self::InsufficientResources,
            ErrorCategory::Internal => Self::InternalError,
            ErrorCategory::External => Self::External,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UserError => "USER_ERROR",
            Self::InsufficientResources => "INSUFFICIENT_RESOURCES",
            Self::InternalError => "INTERNAL_ERROR",
            Self::External => "EXTERNAL",
        };
        f.write_str(s)
    }
}

/// A stable numeric code for a specific failure, used on the wire.
pub type ErrorCode = u32;

/// Well-known error codes referenced elsewhere in the core (memory
/// accounting, codec corruption, cancellation). Connector- and
/// planner-owned codes are out of scope and are represented only by their
/// category.
pub mod codes {
    use super::ErrorCode;

    /// Query or task was explicitly canceled by the client/coordinator.
    pub const QUERY_CANCELED: ErrorCode = 1;
    /// A query exceeded its memory reservation and could not spill further.
    pub const EXCEEDED_MEMORY: ErrorCode = 2;
    /// A page failed to deserialize (header mismatch, bad encoding tag,
    /// decompression/decryption failure).
    pub const MALFORMED_PAGE: ErrorCode = 3;
    /// A remote task was lost (transport failure surfaced as fatal).
    pub const REMOTE_TASK_ERROR: ErrorCode = 4;
    /// A transaction operation was attempted after the transaction reached
    /// a terminal state.
    pub const TRANSACTION_ALREADY_COMPLETE: ErrorCode = 5;
    /// A worker does not support the requested operation (e.g. transaction
    /// management on a worker node).
    pub const UNSUPPORTED_OPERATION: ErrorCode = 6;
}

/// The user-visible shape of a failed query, per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    /// Stable numeric code, see [`codes`].
    pub error_code: ErrorCode,
    /// Symbolic name, e.g. `"EXCEEDED_MEMORY"`.
    pub error_name: String,
    /// The broad category for client-side handling.
    pub error_type: ErrorType,
    /// Human-readable message.
    pub message: String,
    /// Optional server-side stack trace, omitted by default.
    pub stack: Option<String>,
}

impl FailureInfo {
    /// Construct a failure for an explicit cancellation, which per §7 is
    /// distinct from a failure but reported through the same shape with
    /// `errorType = USER_ERROR, errorName = QUERY_CANCELED`.
    pub fn canceled() -> Self {
        Self {
            error_code: codes::QUERY_CANCELED,
            error_name: "QUERY_CANCELED".to_string(),
            error_type: ErrorType::UserError,
            message: "Query was canceled".to_string(),
            stack: None,
        }
    }

    /// Construct a failure from a category, code, name, and message.
    pub fn new(
        category: ErrorCategory,
        error_code: ErrorCode,
        error_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_code,
            error_name: error_name.into(),
            error_type: category.into(),
            message: message.into(),
            stack: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_internal_errors_are_retryable() {
        assert!(!ErrorCategory::User.retryable());
        assert!(!ErrorCategory::External.retryable());
        assert!(!ErrorCategory::InsufficientResources.retryable());
        assert!(ErrorCategory::Internal.retryable());
    }

    #[test]
    fn canceled_failure_is_user_error_with_fixed_name() {
        let f = FailureInfo::canceled();
        assert_eq!(f.error_type, ErrorType::UserError);
        assert_eq!(f.error_name, "QUERY_CANCELED");
    }

    #[test]
    fn category_maps_to_error_type() {
        assert_eq!(ErrorType::from(ErrorCategory::Internal), ErrorType::InternalError);
        assert_eq!(ErrorType::from(ErrorCategory::External), ErrorType::External);
    }
}
