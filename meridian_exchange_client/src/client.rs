//! [`ExchangeClient`]: per-consuming-Task pull side of the Exchange
//! protocol (§4.7). Maintains one or more upstream `(taskId, clientId)`
//! endpoints, retrying transient transport failures with
//! [`crate::retry::RetrySequence`] and surfacing fatal ones immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meridian_memory::LocalMemoryManager;
use meridian_metric::{Registry, U64Counter};
use meridian_page::codec;
use meridian_page::page::Page;
use meridian_rpc::ids::{ExchangeClientId, TaskId};
use meridian_rpc::traits::{BlockedFuture, TransportError, WorkerTaskApi};
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;

use crate::error::{ExchangeClientError, FatalSnafu, MalformedPageSnafu};
use crate::retry::{ExchangeBackoffConfig, RetrySequence};
use snafu::ResultExt;

/// One upstream Output Buffer client this Exchange Client reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// The upstream task.
    pub task_id: TaskId,
    /// Which of that task's output buffer clients this endpoint reads.
    pub client_id: ExchangeClientId,
}

#[derive(Debug)]
struct EndpointState {
    endpoint: Endpoint,
    next_seq: u64,
    pending_ack: Option<u64>,
    finished: bool,
}

/// Tunables for an [`ExchangeClient`].
#[derive(Debug, Clone, Copy)]
pub struct ExchangeClientConfig {
    /// Backoff applied between retries of a transient transport failure.
    pub backoff: ExchangeBackoffConfig,
    /// Max bytes requested per `get` call.
    pub max_bytes_per_request: u64,
}

impl Default for ExchangeClientConfig {
    fn default() -> Self {
        Self {
            backoff: ExchangeBackoffConfig::default(),
            max_bytes_per_request: 32 * 1024 * 1024,
        }
    }
}

/// Pulls Pages from one or more upstream Output Buffers into a bounded
/// local buffer, applying retry/backoff/backpressure/cancellation per
/// §4.7. Generic over the transport so tests can supply an in-process
/// [`WorkerTaskApi`] implementation instead of a real network client.
#[derive(Debug)]
pub struct ExchangeClient<A> {
    api: Arc<A>,
    config: ExchangeClientConfig,
    memory: Arc<LocalMemoryManager>,
    endpoints: Mutex<Vec<EndpointState>>,
    buffer: Mutex<VecDeque<Page>>,
    cancelled: AtomicBool,
    pages_pulled: Arc<U64Counter>,
    retries: Arc<U64Counter>,
}

impl<A: WorkerTaskApi> ExchangeClient<A> {
    /// Construct a client over `endpoints`, charging buffered pages
    /// against `memory`.
    pub fn new(
        api: Arc<A>,
        endpoints: Vec<Endpoint>,
        memory: Arc<LocalMemoryManager>,
        config: ExchangeClientConfig,
        registry: &Registry,
    ) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| EndpointState {
                endpoint,
                next_seq: 0,
                pending_ack: None,
                finished: false,
            })
            .collect();
        Self {
            api,
            config,
            memory,
            endpoints: Mutex::new(endpoints),
            buffer: Mutex::new(VecDeque::new()),
            cancelled: AtomicBool::new(false),
            pages_pulled: registry.counter("exchange_client_pages_pulled"),
            retries: registry.counter("exchange_client_retries"),
        }
    }

    /// Run every endpoint to completion (or until cancelled), pulling pages
    /// into the local buffer. Intended to be spawned onto an executor
    /// alongside the consuming Driver; returns once every endpoint reports
    /// `bufferComplete` or [`Self::cancel`] is called.
    pub async fn run(&self) -> Result<(), ExchangeClientError> {
        loop {
            if self.is_cancelled() {
                return Ok(());
            }
            if self.all_endpoints_finished() {
                return Ok(());
            }

            self.memory.not_full_future().await;
            if self.is_cancelled() {
                return Ok(());
            }

            let endpoint_count = self.endpoints.lock().len();
            for i in 0..endpoint_count {
                if self.is_cancelled() {
                    return Ok(());
                }
                self.pull_one(i).await?;
            }
        }
    }

    /// Pull one batch from endpoint index `i`, retrying transient failures
    /// internally per §4.7. Returns once that endpoint has produced a
    /// batch, is finished, or a fatal error is hit.
    async fn pull_one(&self, i: usize) -> Result<(), ExchangeClientError> {
        let (endpoint, from_seq, pending_ack, max_bytes) = {
            let endpoints = self.endpoints.lock();
            let state = &endpoints[i];
            if state.finished {
                return Ok(());
            }
            (
                state.endpoint,
                state.next_seq,
                state.pending_ack,
                self.config.max_bytes_per_request,
            )
        };

        if let Some(upto) = pending_ack {
            // Acknowledge the previous batch before asking for more (§4.7:
            // "on each successful batch it acknowledges the previous batch").
            self.acknowledge(endpoint, upto).await?;
        }

        let mut retry = RetrySequence::new(self.config.backoff);
        loop {
            if self.is_cancelled() {
                return Ok(());
            }
            match self
                .api
                .get_results(endpoint.task_id, endpoint.client_id, from_seq, max_bytes)
                .await
            {
                Ok(batch) => {
                    retry.reset();
                    let mut pages = Vec::with_capacity(batch.pages.len());
                    for bytes in &batch.pages {
                        let page = codec::deserialize(bytes, None).context(MalformedPageSnafu {
                            task_id: endpoint.task_id,
                            client_id: endpoint.client_id,
                        })?;
                        pages.push(page);
                    }

                    let mut total_bytes = 0i64;
                    {
                        let mut buffer = self.buffer.lock();
                        for page in pages {
                            total_bytes += page.size_in_bytes() as i64;
                            buffer.push_back(page);
                        }
                    }
                    if total_bytes > 0 {
                        self.memory.update(total_bytes);
                    }
                    self.pages_pulled.inc(batch.pages.len() as u64);

                    let mut endpoints = self.endpoints.lock();
                    let state = &mut endpoints[i];
                    state.next_seq = batch.next_seq;
                    state.pending_ack = Some(batch.next_seq);
                    if batch.buffer_complete {
                        state.finished = true;
                        debug!(
                            task_id = %endpoint.task_id,
                            client_id = %endpoint.client_id,
                            "exchange endpoint finished"
                        );
                    }
                    return Ok(());
                }
                Err(TransportError::Fatal(message)) => {
                    return FatalSnafu {
                        task_id: endpoint.task_id,
                        client_id: endpoint.client_id,
                        message,
                    }
                    .fail();
                }
                Err(TransportError::Transient(message)) => {
                    self.retries.inc(1);
                    let delay = retry.next_delay();
                    warn!(
                        task_id = %endpoint.task_id,
                        client_id = %endpoint.client_id,
                        message,
                        delay_ms = delay.as_millis() as u64,
                        "exchange client retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn acknowledge(&self, endpoint: Endpoint, upto_seq: u64) -> Result<(), ExchangeClientError> {
        match self
            .api
            .acknowledge_results(endpoint.task_id, endpoint.client_id, upto_seq)
            .await
        {
            Ok(()) => Ok(()),
            Err(TransportError::Fatal(message)) => FatalSnafu {
                task_id: endpoint.task_id,
                client_id: endpoint.client_id,
                message,
            }
            .fail(),
            Err(TransportError::Transient(_)) => {
                // A dropped acknowledgement is not fatal: the upstream just
                // retains the pages a little longer, the next successful
                // `get` will ack a later `uptoSeq` anyway.
                Ok(())
            }
        }
    }

    /// Pop the next locally-buffered page, releasing its memory.
    pub fn next_page(&self) -> Option<Page> {
        let page = self.buffer.lock().pop_front();
        if let Some(page) = &page {
            self.memory.update(-(page.size_in_bytes() as i64));
        }
        page
    }

    /// Whether every endpoint has reported `bufferComplete` and the local
    /// buffer has been fully drained.
    pub fn is_finished(&self) -> bool {
        self.all_endpoints_finished() && self.buffer.lock().is_empty()
    }

    fn all_endpoints_finished(&self) -> bool {
        self.endpoints.lock().iter().all(|e| e.finished)
    }

    /// A future that resolves once the local buffer has room, for callers
    /// driving this client from a Driver's `is_blocked` (§4.7's
    /// `not_full_future`).
    pub fn not_full_future(&self) -> BlockedFuture {
        self.memory.not_full_future()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancel every endpoint: stop pulling, ask the upstream to abort each
    /// one, and drop whatever is still buffered locally (§4.7).
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let endpoints: Vec<Endpoint> = self.endpoints.lock().iter().map(|e| e.endpoint).collect();
        for endpoint in endpoints {
            if let Err(err) = self.api.cancel_task(endpoint.task_id, true).await {
                warn!(task_id = %endpoint.task_id, ?err, "failed to cancel exchange endpoint upstream");
            }
        }

        let mut buffer = self.buffer.lock();
        let dropped: i64 = buffer.iter().map(|p| p.size_in_bytes() as i64).sum();
        buffer.clear();
        drop(buffer);
        if dropped > 0 {
            self.memory.update(-dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meridian_page::block::{Block, FixedWidthBlock};
    use meridian_rpc::traits::ResultBatch;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex as StdMutex;

    fn int_page(v: i64) -> Page {
        Page::new(vec![Block::LongArray(FixedWidthBlock::new(vec![v], None).unwrap())])
    }

    #[derive(Debug)]
    struct FakeWorker {
        batches: StdMutex<VecDeque<Result<ResultBatch, TransportError>>>,
        acks: AtomicU64,
        cancels: AtomicU64,
    }

    impl FakeWorker {
        fn new(batches: Vec<Result<ResultBatch, TransportError>>) -> Self {
            Self {
                batches: StdMutex::new(batches.into()),
                acks: AtomicU64::new(0),
                cancels: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkerTaskApi for FakeWorker {
        async fn get_results(
            &self,
            _task_id: TaskId,
            _client_id: ExchangeClientId,
            _from_seq: u64,
            _max_bytes: u64,
        ) -> Result<ResultBatch, TransportError> {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ResultBatch {
                    pages: vec![],
                    next_seq: 0,
                    buffer_complete: true,
                }))
        }

        async fn acknowledge_results(
            &self,
            _task_id: TaskId,
            _client_id: ExchangeClientId,
            _upto_seq: u64,
        ) -> Result<(), TransportError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cancel_task(&self, _task_id: TaskId, _abort: bool) -> Result<(), TransportError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            task_id: TaskId::new(1),
            client_id: ExchangeClientId::new(0),
        }
    }

    #[tokio::test]
    async fn pulls_and_surfaces_pages_in_order() {
        let page1 = codec::serialize(&int_page(1), None);
        let page2 = codec::serialize(&int_page(2), None);
        let worker = Arc::new(FakeWorker::new(vec![
            Ok(ResultBatch {
                pages: vec![page1, page2],
                next_seq: 2,
                buffer_complete: true,
            }),
        ]));

        let memory = Arc::new(LocalMemoryManager::for_test(1_000_000));
        let client = ExchangeClient::new(
            worker,
            vec![endpoint()],
            memory,
            ExchangeClientConfig::default(),
            &Registry::new(),
        );

        client.run().await.unwrap();
        assert!(client.is_finished());

        let a = client.next_page().unwrap();
        let b = client.next_page().unwrap();
        assert_eq!(a.channel(0).get_long(0).unwrap(), 1);
        assert_eq!(b.channel(0).get_long(0).unwrap(), 2);
        assert!(client.next_page().is_none());
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let page1 = codec::serialize(&int_page(42), None);
        let worker = Arc::new(FakeWorker::new(vec![
            Err(TransportError::Transient("timeout".into())),
            Err(TransportError::Transient("timeout".into())),
            Ok(ResultBatch {
                pages: vec![page1],
                next_seq: 1,
                buffer_complete: true,
            }),
        ]));

        let memory = Arc::new(LocalMemoryManager::for_test(1_000_000));
        let mut config = ExchangeClientConfig::default();
        config.backoff.init_backoff = std::time::Duration::from_millis(1);
        config.backoff.max_backoff = std::time::Duration::from_millis(5);
        let client = ExchangeClient::new(
            worker,
            vec![endpoint()],
            memory,
            config,
            &Registry::new(),
        );

        tokio::time::timeout(std::time::Duration::from_secs(5), client.run())
            .await
            .expect("client should not hang")
            .unwrap();

        assert_eq!(client.next_page().unwrap().channel(0).get_long(0).unwrap(), 42);
    }

    #[tokio::test]
    async fn fatal_errors_surface_immediately() {
        let worker = Arc::new(FakeWorker::new(vec![Err(TransportError::Fatal(
            "unauthorized".into(),
        ))]));

        let memory = Arc::new(LocalMemoryManager::for_test(1_000_000));
        let client = ExchangeClient::new(
            worker,
            vec![endpoint()],
            memory,
            ExchangeClientConfig::default(),
            &Registry::new(),
        );

        let err = client.run().await.unwrap_err();
        assert!(matches!(err, ExchangeClientError::Fatal { .. }));
    }

    #[tokio::test]
    async fn cancel_drops_buffered_pages_and_cancels_upstream() {
        let page1 = codec::serialize(&int_page(1), None);
        let worker = Arc::new(FakeWorker::new(vec![Ok(ResultBatch {
            pages: vec![page1],
            next_seq: 1,
            buffer_complete: false,
        })]));

        let memory = Arc::new(LocalMemoryManager::for_test(1_000_000));
        let client = Arc::new(ExchangeClient::new(
            worker.clone(),
            vec![endpoint()],
            memory.clone(),
            ExchangeClientConfig::default(),
            &Registry::new(),
        ));

        client.pull_one(0).await.unwrap();
        assert!(memory.usage() > 0, "page should be buffered before cancel");

        client.cancel().await;
        assert!(client.is_cancelled());
        assert_eq!(worker.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(memory.usage(), 0, "cancel should drop buffered pages");
        assert!(client.next_page().is_none());
    }
}
