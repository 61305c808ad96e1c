//! Transaction Manager (§4.10): coordinator-side issuance and tracking of
//! Transactions that bracket connector writes/reads for a query, plus a
//! worker-side no-op stand-in (workers never own transactions).

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod error;
pub mod transaction;

pub use error::TxnError;
pub use transaction::{
    CoordinatorTransactionManager, IsolationLevel, NoOpTransactionManager, TerminalOutcome, TransactionInfo,
    TransactionManager,
};
