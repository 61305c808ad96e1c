//! Distributes pages cyclically to N sinks (§4.6).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use meridian_memory::LocalMemoryManager;
use meridian_page::page::Page;
use meridian_rpc::traits::BlockedFuture;

use crate::pipe::Pipe;

/// A 1:N local exchange that hands each incoming page to the next sink in
/// round-robin order.
#[derive(Debug)]
pub struct RoundRobinExchange {
    pipes: Vec<Arc<Pipe>>,
    next: AtomicUsize,
}

impl RoundRobinExchange {
    /// Construct an exchange fanning out to `partition_count` sinks, all
    /// sharing `memory`.
    pub fn new(partition_count: usize, memory: Arc<LocalMemoryManager>) -> Self {
        assert!(partition_count > 0, "round-robin exchange needs at least one partition");
        Self {
            pipes: (0..partition_count).map(|_| Arc::new(Pipe::new(Arc::clone(&memory)))).collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Number of downstream partitions.
    pub fn partition_count(&self) -> usize {
        self.pipes.len()
    }

    /// The single shared writer handle: each call to
    /// [`RoundRobinWriter::accept_page`] advances to the next partition.
    pub fn writer(&self) -> RoundRobinWriter {
        RoundRobinWriter {
            pipes: self.pipes.clone(),
            next: Arc::new(AtomicUsize::new(self.next.load(Ordering::Relaxed))),
        }
    }

    /// The source reading partition `i`.
    pub fn source(&self, i: usize) -> RoundRobinSource {
        RoundRobinSource {
            pipe: Arc::clone(&self.pipes[i]),
        }
    }

    /// Signal no more pages will be written to any partition.
    pub fn finish(&self) {
        for p in &self.pipes {
            p.finish();
        }
    }
}

/// Writable end of a [`RoundRobinExchange`], shared by however many
/// upstream operators feed it.
#[derive(Debug, Clone)]
pub struct RoundRobinWriter {
    pipes: Vec<Arc<Pipe>>,
    next: Arc<AtomicUsize>,
}

impl RoundRobinWriter {
    /// Push `page` to the next partition in cyclic order.
    pub fn accept_page(&self, page: Page) {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.pipes.len();
        self.pipes[i].push(page);
    }

    /// A future resolving when every partition has room again.
    pub fn wait_for_writing(&self) -> BlockedFuture {
        // Any one pipe's memory manager reflects the whole exchange's
        // shared budget (§4.6), so waiting on the first is equivalent to
        // waiting on all.
        self.pipes[0].wait_for_writing()
    }
}

/// Readable end of one partition of a [`RoundRobinExchange`].
#[derive(Debug, Clone)]
pub struct RoundRobinSource {
    pipe: Arc<Pipe>,
}

impl RoundRobinSource {
    /// Pop the next page for this partition, if any.
    pub fn next_page(&self) -> Option<Page> {
        self.pipe.pop()
    }

    /// Whether writing is finished and this partition is drained.
    pub fn is_finished(&self) -> bool {
        self.pipe.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_page::block::{Block, FixedWidthBlock};

    fn page(v: i32) -> Page {
        Page::new(vec![Block::IntArray(FixedWidthBlock::new(vec![v], None).unwrap())])
    }

    #[test]
    fn distributes_cyclically_across_partitions() {
        let exchange = RoundRobinExchange::new(3, Arc::new(LocalMemoryManager::for_test(10_000)));
        let writer = exchange.writer();
        for v in 0..6 {
            writer.accept_page(page(v));
        }
        exchange.finish();

        for i in 0..3 {
            let source = exchange.source(i);
            let a = source.next_page().unwrap().channel(0).get_long(0).unwrap();
            let b = source.next_page().unwrap().channel(0).get_long(0).unwrap();
            assert_eq!(a as usize, i);
            assert_eq!(b as usize, i + 3);
            assert!(source.is_finished());
        }
    }
}
