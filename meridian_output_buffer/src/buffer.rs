//! [`OutputBuffer`]: a Task's outbound per-client queue of [`Page`]s keyed
//! by monotonic sequence id (§4.7), supporting the Partitioned, Broadcast,
//! and Arbitrary policies.

use std::collections::VecDeque;
use std::sync::Arc;

use meridian_memory::LocalMemoryManager;
use meridian_metric::{Registry, U64Counter};
use meridian_page::page::Page;
use meridian_rpc::ids::ExchangeClientId;
use observability_deps::tracing::{debug, trace};
use parking_lot::Mutex;

use crate::error::{ClientAbortedSnafu, InvalidPartitionSnafu, OutputBufferError, UnknownClientSnafu};
use snafu::ensure;

/// How an [`OutputBuffer`] routes pages enqueued by its Task's Output
/// operator to its downstream clients (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputBufferPolicy {
    /// `N` clients, one per downstream task; `enqueue`'s `partition`
    /// argument selects the client directly.
    Partitioned,
    /// Every enqueued page is copied to every client; `enqueue`'s
    /// `partition` argument is ignored.
    Broadcast,
    /// A single shared backlog; whichever client next calls `get` claims
    /// the oldest not-yet-claimed page. `enqueue`'s `partition` argument is
    /// ignored. Once claimed by a client, a page is that client's alone —
    /// ties are broken FIFO (§4.7).
    Arbitrary,
}

/// The `(pages, nextSeq, bufferComplete)` result of [`OutputBuffer::get`]
/// (§4.7).
#[derive(Debug, Clone)]
pub struct GetResult {
    /// Pages with `seq` in `[fromSeq, nextSeq)`.
    pub pages: Vec<Page>,
    /// The sequence number the next `get` call for this client should
    /// start from.
    pub next_seq: u64,
    /// True iff no more pages will ever be produced for this client and
    /// every one of them has already been acknowledged.
    pub buffer_complete: bool,
}

#[derive(Debug)]
struct ClientState {
    /// Entries not yet acknowledged, in ascending `seq` order. Includes
    /// both already-delivered-but-unacked and not-yet-delivered (Arbitrary
    /// backlog claims happen eagerly into this queue too, see `get`).
    buffered: VecDeque<(u64, Page)>,
    /// Sequence number to assign to the next page entering this client's
    /// queue.
    next_seq: u64,
    aborted: bool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            buffered: VecDeque::new(),
            next_seq: 0,
            aborted: false,
        }
    }
}

#[derive(Debug)]
struct State {
    clients: Vec<ClientState>,
    /// Only populated/consumed under [`OutputBufferPolicy::Arbitrary`]:
    /// pages enqueued but not yet claimed by any client.
    backlog: VecDeque<Page>,
    no_more_pages: bool,
    destroyed: bool,
}

/// A Task's outbound Page queue (§4.7). Shared by reference between the
/// Task's Output operator (the writer) and however many downstream
/// Exchange Clients pull from it (the readers); the writer and readers
/// never need to coordinate directly, only through this buffer.
#[derive(Debug)]
pub struct OutputBuffer {
    policy: OutputBufferPolicy,
    memory: Arc<LocalMemoryManager>,
    state: Mutex<State>,
    pages_enqueued: Arc<U64Counter>,
    pages_delivered: Arc<U64Counter>,
}

impl OutputBuffer {
    /// Construct a buffer with `client_count` downstream clients, routed
    /// by `policy`, charging buffered bytes against `memory`.
    pub fn new(
        policy: OutputBufferPolicy,
        client_count: usize,
        memory: Arc<LocalMemoryManager>,
        registry: &Registry,
    ) -> Self {
        assert!(client_count > 0, "output buffer needs at least one client");
        Self {
            policy,
            memory,
            state: Mutex::new(State {
                clients: (0..client_count).map(|_| ClientState::new()).collect(),
                backlog: VecDeque::new(),
                no_more_pages: false,
                destroyed: false,
            }),
            pages_enqueued: registry.counter("output_buffer_pages_enqueued"),
            pages_delivered: registry.counter("output_buffer_pages_delivered"),
        }
    }

    /// Construct a buffer with no metrics registry attachment, for tests.
    pub fn for_test(policy: OutputBufferPolicy, client_count: usize, memory_limit: i64) -> Self {
        Self::new(
            policy,
            client_count,
            Arc::new(LocalMemoryManager::for_test(memory_limit)),
            &Registry::new(),
        )
    }

    /// Number of configured downstream clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// The shared memory manager backing this buffer's accounting; callers
    /// writing into the buffer should await
    /// [`meridian_memory::LocalMemoryManager::not_full_future`] on this
    /// before pushing more, for backpressure (§4.7).
    pub fn memory(&self) -> &Arc<LocalMemoryManager> {
        &self.memory
    }

    /// Append `page` for delivery, routed per this buffer's policy.
    /// `partition` selects the client under [`OutputBufferPolicy::Partitioned`]
    /// and is ignored otherwise.
    pub fn enqueue(&self, partition: usize, page: Page) -> Result<(), OutputBufferError> {
        let size = page.size_in_bytes() as i64;
        let mut state = self.state.lock();
        ensure!(!state.no_more_pages, crate::error::NoMorePagesSnafu);

        match self.policy {
            OutputBufferPolicy::Partitioned => {
                ensure!(
                    partition < state.clients.len(),
                    InvalidPartitionSnafu { partition }
                );
                let client = &mut state.clients[partition];
                let seq = client.next_seq;
                client.next_seq += 1;
                client.buffered.push_back((seq, page));
                self.memory.update(size);
            }
            OutputBufferPolicy::Broadcast => {
                let n = state.clients.len();
                for client in &mut state.clients {
                    let seq = client.next_seq;
                    client.next_seq += 1;
                    client.buffered.push_back((seq, page.clone()));
                }
                self.memory.update(size * n as i64);
            }
            OutputBufferPolicy::Arbitrary => {
                state.backlog.push_back(page);
                self.memory.update(size);
            }
        }
        self.pages_enqueued.inc(1);
        trace!(partition, policy = ?self.policy, "enqueued page to output buffer");
        Ok(())
    }

    /// Mark that no more pages will ever be enqueued (any source's
    /// `noMoreSplits`-driven drain has completed, §4.8).
    pub fn set_no_more_pages(&self) {
        self.state.lock().no_more_pages = true;
        debug!("output buffer marked no-more-pages");
    }

    /// Idempotent for the same `from_seq` (§4.7, §8 property 2): returns
    /// pages with `seq >= from_seq` up to `max_bytes`, claiming fresh pages
    /// from the shared backlog first if this is an [`OutputBufferPolicy::Arbitrary`]
    /// buffer and the client has exhausted what it already claimed.
    pub fn get(
        &self,
        client_id: ExchangeClientId,
        from_seq: u64,
        max_bytes: u64,
    ) -> Result<GetResult, OutputBufferError> {
        let mut state = self.state.lock();
        let destroyed = state.destroyed;
        let no_more_pages = state.no_more_pages;
        let idx = client_id.as_u64() as usize;
        ensure!(
            idx < state.clients.len(),
            UnknownClientSnafu { client_id }
        );

        if matches!(self.policy, OutputBufferPolicy::Arbitrary) && !destroyed {
            let mut servable: u64 = state.clients[idx]
                .buffered
                .iter()
                .filter(|(seq, _)| *seq >= from_seq)
                .map(|(_, p)| p.size_in_bytes())
                .sum();
            while servable < max_bytes {
                let Some(page) = state.backlog.pop_front() else {
                    break;
                };
                servable += page.size_in_bytes();
                let client = &mut state.clients[idx];
                let seq = client.next_seq;
                client.next_seq += 1;
                client.buffered.push_back((seq, page));
            }
        }

        let client = &state.clients[idx];
        ensure!(!client.aborted, ClientAbortedSnafu { client_id });

        let mut pages = Vec::new();
        let mut bytes = 0u64;
        let mut next_seq = from_seq;
        for (seq, page) in client.buffered.iter() {
            if *seq < from_seq {
                continue;
            }
            let page_size = page.size_in_bytes();
            if !pages.is_empty() && bytes.saturating_add(page_size) > max_bytes {
                break;
            }
            pages.push(page.clone());
            bytes += page_size;
            next_seq = seq + 1;
        }

        let backlog_exhausted_for_client = !matches!(self.policy, OutputBufferPolicy::Arbitrary)
            || state.backlog.is_empty();
        let buffer_complete = destroyed
            || (no_more_pages && backlog_exhausted_for_client && state.clients[idx].buffered.is_empty());

        self.pages_delivered.inc(pages.len() as u64);
        Ok(GetResult {
            pages,
            next_seq,
            buffer_complete,
        })
    }

    /// Whether every client's buffered pages have been delivered and
    /// acknowledged and no more pages will ever be enqueued (§4.8's Task
    /// termination condition) — the same `bufferComplete` test `get`
    /// applies to one client, evaluated across all of them at once so a
    /// Task can learn this without a client polling first.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.destroyed
            || (state.no_more_pages
                && state.backlog.is_empty()
                && state.clients.iter().all(|c| c.buffered.is_empty()))
    }

    /// Release retained memory for every page below `upto_seq` for
    /// `client_id` (§4.7).
    pub fn acknowledge(&self, client_id: ExchangeClientId, upto_seq: u64) -> Result<(), OutputBufferError> {
        let mut state = self.state.lock();
        let idx = client_id.as_u64() as usize;
        ensure!(idx < state.clients.len(), UnknownClientSnafu { client_id });

        let client = &mut state.clients[idx];
        let mut released = 0i64;
        while let Some((seq, _)) = client.buffered.front() {
            if *seq >= upto_seq {
                break;
            }
            let (_, page) = client.buffered.pop_front().expect("checked non-empty");
            released += page.size_in_bytes() as i64;
        }
        drop(state);
        if released > 0 {
            self.memory.update(-released);
        }
        Ok(())
    }

    /// Abort a single client: drop its buffered pages (releasing memory)
    /// and mark it so future `get` calls fail with [`OutputBufferError::ClientAborted`].
    pub fn abort(&self, client_id: ExchangeClientId) -> Result<(), OutputBufferError> {
        let mut state = self.state.lock();
        let idx = client_id.as_u64() as usize;
        ensure!(idx < state.clients.len(), UnknownClientSnafu { client_id });

        let client = &mut state.clients[idx];
        let released: i64 = client.buffered.iter().map(|(_, p)| p.size_in_bytes() as i64).sum();
        client.buffered.clear();
        client.aborted = true;
        drop(state);
        if released > 0 {
            self.memory.update(-released);
        }
        debug!(%client_id, "output buffer client aborted");
        Ok(())
    }

    /// Tear down the whole buffer: release every client's buffered memory
    /// and mark it destroyed. Per the Open Question resolution (§9): a
    /// `get` racing with `destroy` observes `bufferComplete = true` rather
    /// than an error, since from the caller's point of view a destroyed
    /// buffer behaves exactly like one that finished and was fully
    /// acknowledged.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        let mut released = 0i64;
        for client in &mut state.clients {
            released += client.buffered.iter().map(|(_, p)| p.size_in_bytes() as i64).sum::<i64>();
            client.buffered.clear();
        }
        released += state.backlog.iter().map(|p| p.size_in_bytes() as i64).sum::<i64>();
        state.backlog.clear();
        state.destroyed = true;
        drop(state);
        if released > 0 {
            self.memory.update(-released);
        }
        debug!("output buffer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_page::block::{Block, FixedWidthBlock};

    fn page(v: i32) -> Page {
        Page::new(vec![Block::IntArray(FixedWidthBlock::new(vec![v], None).unwrap())])
    }

    fn client(i: u64) -> ExchangeClientId {
        ExchangeClientId::new(i)
    }

    #[test]
    fn scenario_b_partitioned_two_clients() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Partitioned, 2, 100_000);
        buffer.enqueue(0, page(1)).unwrap(); // A
        buffer.enqueue(0, page(2)).unwrap(); // B
        buffer.enqueue(1, page(3)).unwrap(); // C

        let r0 = buffer.get(client(0), 0, u64::MAX).unwrap();
        assert_eq!(r0.pages.len(), 2);
        assert_eq!(r0.next_seq, 2);

        let r1 = buffer.get(client(1), 0, u64::MAX).unwrap();
        assert_eq!(r1.pages.len(), 1);
        assert_eq!(r1.next_seq, 1);

        buffer.acknowledge(client(0), 2).unwrap();
        buffer.enqueue(0, page(4)).unwrap(); // D
        let r2 = buffer.get(client(0), 2, u64::MAX).unwrap();
        assert_eq!(r2.pages.len(), 1);
        assert_eq!(r2.next_seq, 3);
        assert_eq!(r2.pages[0].channel(0).get_long(0).unwrap(), 4);
    }

    #[test]
    fn idempotent_read_until_acknowledge_moves_window() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Partitioned, 1, 100_000);
        buffer.enqueue(0, page(1)).unwrap();
        buffer.enqueue(0, page(2)).unwrap();

        let first = buffer.get(client(0), 0, u64::MAX).unwrap();
        let second = buffer.get(client(0), 0, u64::MAX).unwrap();
        assert_eq!(first.next_seq, second.next_seq);
        assert_eq!(first.pages.len(), second.pages.len());
        for (a, b) in first.pages.iter().zip(second.pages.iter()) {
            assert_eq!(a.channel(0).get_long(0).unwrap(), b.channel(0).get_long(0).unwrap());
        }
    }

    #[test]
    fn monotonic_sequence_covers_zero_to_k_exactly_once_unacked() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Partitioned, 1, 1_000_000);
        for i in 0..5 {
            buffer.enqueue(0, page(i)).unwrap();
        }
        let result = buffer.get(client(0), 0, u64::MAX).unwrap();
        let seqs: Vec<u64> = (0..result.pages.len() as u64).collect();
        assert_eq!(result.next_seq, 5);
        assert_eq!(seqs, (0..5).collect::<Vec<_>>());
    }

    #[test]
    fn broadcast_delivers_every_page_to_every_client() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Broadcast, 3, 1_000_000);
        buffer.enqueue(0, page(7)).unwrap();
        buffer.set_no_more_pages();

        for c in 0..3 {
            let r = buffer.get(client(c), 0, u64::MAX).unwrap();
            assert_eq!(r.pages.len(), 1);
            assert_eq!(r.pages[0].channel(0).get_long(0).unwrap(), 7);
            buffer.acknowledge(client(c), 1).unwrap();
            let done = buffer.get(client(c), 1, u64::MAX).unwrap();
            assert!(done.buffer_complete);
        }
    }

    #[test]
    fn arbitrary_policy_splits_backlog_across_competing_clients() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Arbitrary, 2, 1_000_000);
        for i in 0..6 {
            buffer.enqueue(0, page(i)).unwrap();
        }
        buffer.set_no_more_pages();

        let a = buffer.get(client(0), 0, u64::MAX).unwrap();
        let b = buffer.get(client(1), 0, u64::MAX).unwrap();
        // Every page enqueued lands on exactly one of the two clients.
        assert_eq!(a.pages.len() + b.pages.len(), 6);
    }

    #[test]
    fn acknowledge_releases_memory() {
        let memory = Arc::new(LocalMemoryManager::for_test(1_000_000));
        let buffer = OutputBuffer::new(
            OutputBufferPolicy::Partitioned,
            1,
            Arc::clone(&memory),
            &Registry::new(),
        );
        buffer.enqueue(0, page(1)).unwrap();
        buffer.enqueue(0, page(2)).unwrap();
        assert!(memory.usage() > 0);

        let r = buffer.get(client(0), 0, u64::MAX).unwrap();
        buffer.acknowledge(client(0), r.next_seq).unwrap();
        assert_eq!(memory.usage(), 0);
    }

    #[test]
    fn destroy_makes_in_flight_reads_observe_buffer_complete() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Partitioned, 1, 1_000_000);
        buffer.enqueue(0, page(1)).unwrap();
        buffer.destroy();

        let r = buffer.get(client(0), 0, u64::MAX).unwrap();
        assert!(r.buffer_complete);
    }

    #[test]
    fn abort_rejects_further_reads() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Partitioned, 1, 1_000_000);
        buffer.enqueue(0, page(1)).unwrap();
        buffer.abort(client(0)).unwrap();

        let err = buffer.get(client(0), 0, u64::MAX).unwrap_err();
        assert!(matches!(err, OutputBufferError::ClientAborted { .. }));
    }

    #[test]
    fn is_drained_true_only_once_acknowledged_after_no_more_pages() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Partitioned, 1, 1_000_000);
        buffer.enqueue(0, page(1)).unwrap();
        assert!(!buffer.is_drained());

        buffer.set_no_more_pages();
        assert!(!buffer.is_drained(), "page still buffered, unacknowledged");

        let r = buffer.get(client(0), 0, u64::MAX).unwrap();
        buffer.acknowledge(client(0), r.next_seq).unwrap();
        assert!(buffer.is_drained());
    }

    #[test]
    fn unknown_partition_is_rejected() {
        let buffer = OutputBuffer::for_test(OutputBufferPolicy::Partitioned, 2, 1_000_000);
        let err = buffer.enqueue(5, page(1)).unwrap_err();
        assert!(matches!(err, OutputBufferError::InvalidPartition { partition: 5 }));
    }
}
