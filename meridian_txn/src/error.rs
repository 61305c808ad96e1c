//! Failures raised by a [`crate::TransactionManager`] implementation
//! (§4.10).

use meridian_rpc::ids::TransactionId;
use snafu::Snafu;

/// An error a [`crate::TransactionManager`] operation refuses with.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum TxnError {
    /// An id was named that [`crate::TransactionManager::begin`] never
    /// issued.
    #[snafu(display("unknown transaction {id}"))]
    UnknownTransaction {
        /// The offending id.
        id: TransactionId,
    },

    /// [`crate::TransactionManager::check_and_set_active`] lost the race:
    /// another caller already holds the active claim (§4.10, §8 property
    /// 8: at most one active claim at a time).
    #[snafu(display("transaction {id} is already claimed active by another caller"))]
    AlreadyActive {
        /// The contended transaction.
        id: TransactionId,
    },

    /// Any operation arrived after the transaction reached a terminal
    /// state (commit/abort/fail); terminal states are absorbing (§3,
    /// §4.10).
    #[snafu(display("transaction {id} already reached a terminal state"))]
    AlreadyComplete {
        /// The completed transaction.
        id: TransactionId,
    },

    /// [`crate::TransactionManager::set_write_catalog`] was asked to
    /// register a second write-target catalog; at most one write target
    /// is permitted per transaction (§3).
    #[snafu(display(
        "transaction {id} already has write catalog {existing:?}, cannot also write {attempted:?}"
    ))]
    MultipleWriteCatalogs {
        /// The transaction this call targeted.
        id: TransactionId,
        /// The catalog already registered as the write target.
        existing: String,
        /// The catalog the caller attempted to register as a second write
        /// target.
        attempted: String,
    },

    /// A worker-side [`crate::NoOpTransactionManager`] refuses every
    /// operation: workers never own transactions (§4.10).
    #[snafu(display("transaction management is not supported on this node"))]
    UnsupportedOperation,
}

impl TxnError {
    /// The stable error code this failure would be reported under (§7),
    /// for callers building a user-visible `FailureInfo`.
    pub fn error_code(&self) -> meridian_error::ErrorCode {
        match self {
            Self::AlreadyComplete { .. } => meridian_error::codes::TRANSACTION_ALREADY_COMPLETE,
            Self::UnsupportedOperation => meridian_error::codes::UNSUPPORTED_OPERATION,
            Self::UnknownTransaction { .. }
            | Self::AlreadyActive { .. }
            | Self::MultipleWriteCatalogs { .. } => 0,
        }
    }
}
