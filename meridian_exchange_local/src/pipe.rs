//! The single-queue building block every local exchange variant routes
//! Pages into: a FIFO of Pages accounted against a shared
//! [`LocalMemoryManager`], closed by [`Pipe::finish`] once its writer(s)
//! are done.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meridian_memory::LocalMemoryManager;
use meridian_page::page::Page;
use meridian_rpc::traits::BlockedFuture;
use parking_lot::Mutex;

/// One FIFO queue of Pages, shared between exactly the sink(s) that write
/// into it and the single source that reads it back out (§4.6's "Sinks
/// expose acceptPage/waitForWriting; sources expose nextPage/isFinished").
#[derive(Debug)]
pub(crate) struct Pipe {
    queue: Mutex<VecDeque<Page>>,
    finished: AtomicBool,
    memory: Arc<LocalMemoryManager>,
}

impl Pipe {
    pub(crate) fn new(memory: Arc<LocalMemoryManager>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            finished: AtomicBool::new(false),
            memory,
        }
    }

    /// Append a page, charging its size to the shared memory manager.
    pub(crate) fn push(&self, page: Page) {
        let size = page.size_in_bytes() as i64;
        self.queue.lock().push_back(page);
        self.memory.update(size);
    }

    /// Pop the oldest page, if any, releasing its charged memory.
    pub(crate) fn pop(&self) -> Option<Page> {
        let page = self.queue.lock().pop_front()?;
        self.memory.update(-(page.size_in_bytes() as i64));
        Some(page)
    }

    /// Mark this pipe's writer(s) as done; no more pages will be pushed.
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Whether the writer is done AND every buffered page has been drained.
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire) && self.queue.lock().is_empty()
    }

    /// A future resolving once this pipe's shared memory manager is below
    /// its limit, for a writer to await before pushing more.
    pub(crate) fn wait_for_writing(&self) -> BlockedFuture {
        self.memory.not_full_future()
    }

    /// Bytes currently buffered across every pipe of the same exchange
    /// (the memory manager is shared, so this reflects the whole
    /// exchange's usage, not just this one pipe).
    pub(crate) fn shared_usage(&self) -> i64 {
        self.memory.usage()
    }

    pub(crate) fn shared_memory(&self) -> &Arc<LocalMemoryManager> {
        &self.memory
    }
}
