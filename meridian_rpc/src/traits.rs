//! Named collaborator traits for the systems §1 calls out of scope (SQL
//! parser/analyzer, planner, connectors, the HTTP resource layer) but whose
//! *shape* the execution core programs against (§6). These are trait
//! definitions only: no transport, no wire codec, no generated client — an
//! implementation lives in a connector crate or the resource layer, neither
//! of which is part of this core.

use async_trait::async_trait;
use futures::future::BoxFuture;
use meridian_page::page::Page;

use crate::ids::{ExchangeClientId, TaskId};
use crate::split::SplitBatch;

/// A future that resolves when the implementor can make progress, mirroring
/// the `isBlocked()` contract shared by connectors and operators (§4.4,
/// §6): once resolved for a given blocking condition it never un-resolves.
pub type BlockedFuture = BoxFuture<'static, ()>;

/// An immediately-resolved [`BlockedFuture`], for callers that are never
/// blocked.
pub fn not_blocked() -> BlockedFuture {
    Box::pin(futures::future::ready(()))
}

/// A connector-supplied stream of [`crate::split::Split`]s for one source
/// stage (§6).
#[async_trait]
pub trait SplitSource: std::fmt::Debug + Send + Sync {
    /// Fetch up to `batch_size` more splits. Returns an empty, non-final
    /// batch if none are ready yet without blocking the caller — callers
    /// that need backpressure should rely on the scheduler's blocked-result
    /// handling (§4.9) rather than busy-polling this method.
    async fn next(&self, batch_size: usize) -> Result<SplitBatch, SplitSourceError>;
}

/// Failure from a [`SplitSource`], categorized per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSourceError {
    /// The failure's category, used by the stage scheduler's retry policy.
    pub category: meridian_error::ErrorCategory,
    /// Human-readable detail.
    pub message: String,
}

/// A connector's readable end of a Split: produces [`Page`]s for a Scan
/// operator (§4.4, §6).
pub trait ConnectorPageSource: std::fmt::Debug + Send {
    /// Pull the next page, or `None` once the source is exhausted.
    fn get_next_page(&mut self) -> Result<Option<Page>, ConnectorError>;

    /// Whether the source has produced its last page and `get_next_page`
    /// will only ever return `Ok(None)` from here on.
    fn is_finished(&self) -> bool;

    /// A future that resolves when the source can make progress (e.g. a
    /// prefetch buffer has data).
    fn is_blocked(&self) -> BlockedFuture;
}

/// A connector's writable end for a CTAS/insert target (§6).
#[async_trait]
pub trait ConnectorPageSink: Send {
    /// Append a page of rows to be written.
    fn append_page(&mut self, page: &Page) -> Result<(), ConnectorError>;

    /// Signal no more pages are coming and await the connector committing
    /// whatever fragments it produced.
    async fn finish(self: Box<Self>) -> Result<Vec<u8>, ConnectorError>;

    /// Abort the write, discarding any partial output.
    async fn abort(self: Box<Self>);
}

/// Failure from a connector page source/sink, categorized per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorError {
    /// The failure's category.
    pub category: meridian_error::ErrorCategory,
    /// Human-readable detail.
    pub message: String,
}

impl ConnectorError {
    /// Construct an `External`-category connector error (the common case —
    /// most connector failures are network/storage failures, §7).
    pub fn external(message: impl Into<String>) -> Self {
        Self {
            category: meridian_error::ErrorCategory::External,
            message: message.into(),
        }
    }
}

/// The `(pages, nextSeq, bufferComplete)` shape an Output Buffer's `get`
/// returns (§4.7), named here so [`ExchangeClientTransport`] does not need
/// to depend on `meridian_output_buffer` (that dependency runs the other
/// way: the exchange client is the *consumer* of an output buffer).
#[derive(Debug, Clone)]
pub struct ResultBatch {
    /// Serialized pages in `[fromSeq, nextSeq)`.
    pub pages: Vec<Vec<u8>>,
    /// The sequence number the next `get` call should start from.
    pub next_seq: u64,
    /// Whether no more pages will ever be produced and all have been
    /// acknowledged — the terminal signal for a consumer.
    pub buffer_complete: bool,
}

/// The worker-side surface the Exchange Client and the coordinator program
/// against (§6's `PUT/GET/DELETE /v1/task/{taskId}` family), named as a
/// trait rather than modeled as HTTP: the resource layer that actually
/// serves these endpoints is out of this core's scope.
#[async_trait]
pub trait WorkerTaskApi: std::fmt::Debug + Send + Sync {
    /// Pull a batch of pages from `clientId` starting at `fromSeq`, capped
    /// at `maxBytes`. Idempotent for the same `fromSeq`.
    async fn get_results(
        &self,
        task_id: TaskId,
        client_id: ExchangeClientId,
        from_seq: u64,
        max_bytes: u64,
    ) -> Result<ResultBatch, TransportError>;

    /// Acknowledge delivery of all pages below `upto_seq`, releasing their
    /// retained memory.
    async fn acknowledge_results(
        &self,
        task_id: TaskId,
        client_id: ExchangeClientId,
        upto_seq: u64,
    ) -> Result<(), TransportError>;

    /// Cancel (abort = true removes buffers immediately).
    async fn cancel_task(&self, task_id: TaskId, abort: bool) -> Result<(), TransportError>;
}

/// A transport-level failure reaching a worker, distinguishing transient
/// conditions the Exchange Client retries from fatal ones it surfaces
/// immediately (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A connection reset, timeout, or 5xx — retry with backoff.
    Transient(String),
    /// Authentication failure, 4xx other than 404-as-gone, or a protocol
    /// violation — surfaced immediately, never retried.
    Fatal(String),
}

impl TransportError {
    /// Whether the Exchange Client should retry this error (§4.7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The coordinator surface a client submits SQL against and polls (§6's
/// `/v1/statement`, `/v1/query/{queryId}` family). Named for completeness
/// of §6's external interfaces; the execution core's own tests drive
/// `meridian_scheduler`/`meridian_txn` directly rather than through this
/// trait, since the HTTP resource layer that would implement it is out of
/// scope (§1).
#[async_trait]
pub trait CoordinatorQueryApi: std::fmt::Debug + Send + Sync {
    /// Submit a SQL statement, returning the assigned query id.
    async fn submit(&self, sql: String) -> Result<crate::ids::QueryId, TransportError>;

    /// Current terminal-or-not state of a query, as a caller-defined
    /// string (the core's own `QueryState` enum lives with the scheduler;
    /// this trait only names the polling shape).
    async fn query_state(&self, query_id: crate::ids::QueryId) -> Result<String, TransportError>;

    /// Cancel a query.
    async fn cancel(&self, query_id: crate::ids::QueryId) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_retryability() {
        assert!(TransportError::Transient("reset".into()).is_retryable());
        assert!(!TransportError::Fatal("unauthorized".into()).is_retryable());
    }
}
