//! One source, one sink, memory-bounded with backpressure (§4.6).

use std::sync::Arc;

use meridian_memory::LocalMemoryManager;
use meridian_page::page::Page;
use meridian_rpc::traits::BlockedFuture;

use crate::pipe::Pipe;

/// A 1:1 local exchange: every page pushed by the sink comes back out of
/// the single source, in order.
#[derive(Debug)]
pub struct PassthroughExchange {
    pipe: Arc<Pipe>,
}

impl PassthroughExchange {
    /// Construct a new passthrough exchange backed by `memory`.
    pub fn new(memory: Arc<LocalMemoryManager>) -> Self {
        Self {
            pipe: Arc::new(Pipe::new(memory)),
        }
    }

    /// This exchange's single sink handle.
    pub fn sink(&self) -> PassthroughSink {
        PassthroughSink {
            pipe: Arc::clone(&self.pipe),
        }
    }

    /// This exchange's single source handle.
    pub fn source(&self) -> PassthroughSource {
        PassthroughSource {
            pipe: Arc::clone(&self.pipe),
        }
    }
}

/// The writable end of a [`PassthroughExchange`].
#[derive(Debug, Clone)]
pub struct PassthroughSink {
    pipe: Arc<Pipe>,
}

impl PassthroughSink {
    /// Push a page into the exchange.
    pub fn accept_page(&self, page: Page) {
        self.pipe.push(page);
    }

    /// A future resolving when the exchange's buffer has room again.
    pub fn wait_for_writing(&self) -> BlockedFuture {
        self.pipe.wait_for_writing()
    }

    /// Signal no more pages will be pushed.
    pub fn finish(&self) {
        self.pipe.finish();
    }
}

/// The readable end of a [`PassthroughExchange`].
#[derive(Debug, Clone)]
pub struct PassthroughSource {
    pipe: Arc<Pipe>,
}

impl PassthroughSource {
    /// Pop the next page, if any is buffered.
    pub fn next_page(&self) -> Option<Page> {
        self.pipe.pop()
    }

    /// Whether the sink is finished and every page has been drained.
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
    fn pages_come_back_out_in_order() {
        let exchange = PassthroughExchange::new(Arc::new(LocalMemoryManager::for_test(1_000)));
        let sink = exchange.sink();
        let source = exchange.source();

        sink.accept_page(page(1));
        sink.accept_page(page(2));
        sink.finish();

        assert!(!source.is_finished());
        assert_eq!(source.next_page().unwrap().channel(0).get_long(0).unwrap(), 1);
        assert!(!source.is_finished());
        assert_eq!(source.next_page().unwrap().channel(0).get_long(0).unwrap(), 2);
        assert!(source.next_page().is_none());
        assert!(source.is_finished());
    }
}
