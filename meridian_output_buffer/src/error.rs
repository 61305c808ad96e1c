//! Failures raised by [`crate::buffer::OutputBuffer`] operations.

use meridian_rpc::ids::ExchangeClientId;
use snafu::Snafu;

/// Errors from [`crate::buffer::OutputBuffer::enqueue`]/`get`/`acknowledge`.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum OutputBufferError {
    /// A `clientId` was referenced that does not exist for this buffer's
    /// configured client count.
    #[snafu(display("unknown output buffer client {client_id}"))]
    UnknownClient {
        /// The offending client id.
        client_id: ExchangeClientId,
    },

    /// `enqueue` named a partition the configured policy does not route
    /// (e.g. a partition index out of range for a `Partitioned` buffer).
    #[snafu(display("partition {partition} is not valid for this output buffer's policy"))]
    InvalidPartition {
        /// The offending partition index.
        partition: usize,
    },

    /// The client was previously aborted; further reads see this instead
    /// of silently returning stale data.
    #[snafu(display("output buffer client {client_id} was aborted"))]
    ClientAborted {
        /// The aborted client.
        client_id: ExchangeClientId,
    },

    /// `enqueue` was called after [`crate::buffer::OutputBuffer::set_no_more_pages`].
    #[snafu(display("cannot enqueue into an output buffer already marked no-more-pages"))]
    NoMorePages,
}
