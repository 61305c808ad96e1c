//! Failures surfaced by [`crate::client::ExchangeClient`] (§4.7: transient
//! transport errors are retried internally and never reach callers as an
//! error; only fatal ones do).

use meridian_rpc::ids::{ExchangeClientId, TaskId};
use snafu::Snafu;

/// An error the Exchange Client gives up and surfaces to its caller.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum ExchangeClientError {
    /// The upstream reported a fatal [`meridian_rpc::traits::TransportError::Fatal`]
    /// (authentication failure, permanent HTTP failure, protocol violation).
    /// Surfaced immediately, never retried.
    #[snafu(display("exchange endpoint task {task_id} client {client_id} failed fatally: {message}"))]
    Fatal {
        /// The upstream task this endpoint reads from.
        task_id: TaskId,
        /// Which of that task's output buffer clients this endpoint is.
        client_id: ExchangeClientId,
        /// The upstream's failure detail.
        message: String,
    },

    /// A page received from an endpoint failed to decode off the wire.
    #[snafu(display("exchange endpoint task {task_id} client {client_id} sent a malformed page: {source}"))]
    MalformedPage {
        /// The upstream task this endpoint reads from.
        task_id: TaskId,
        /// Which of that task's output buffer clients this endpoint is.
        client_id: ExchangeClientId,
        /// The underlying decode failure.
        source: meridian_page::error::MalformedPage,
    },
}
