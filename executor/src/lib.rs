//! A dedicated, named thread pool for running CPU-bound work (Driver
//! quanta) off whatever async reactor the caller happens to be using.
//!
//! Drivers are cooperatively scheduled (§4.5): within one Driver execution
//! is single-threaded, but a worker runs many Drivers in parallel across a
//! fixed pool of threads. [`DedicatedExecutor`] owns that pool. It is
//! intentionally a thin wrapper over a background `tokio` runtime rather
//! than a bespoke thread-pool implementation, so Driver futures can still
//! use `tokio`'s timers and synchronization primitives.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::{
    fmt,
    future::Future,
    sync::Arc,
    thread::JoinHandle as StdJoinHandle,
};

use observability_deps::tracing::{info, warn};
use parking_lot::Mutex;
use tokio::{
    runtime::{Builder, Handle},
    sync::Notify,
    task::JoinHandle,
};

/// A named pool of `num_threads` OS threads, each running its own slice of
/// a `tokio` runtime, dedicated to executing [`Driver::process`]
/// invocations (or other CPU-bound work a caller wants isolated from its
/// own reactor).
///
/// [`Driver::process`]: https://docs.rs/meridian_driver (not a real link;
/// this crate has no dependency on `meridian_driver` to avoid a cycle)
pub struct DedicatedExecutor {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    handle: Mutex<Option<Handle>>,
    shutdown: Notify,
    thread: Mutex<Option<StdJoinHandle<()>>>,
}

impl fmt::Debug for DedicatedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedicatedExecutor")
            .field("name", &self.shared.name)
            .field("running", &self.shared.handle.lock().is_some())
            .finish()
    }
}

impl DedicatedExecutor {
    /// Create a new executor with its own multi-threaded `tokio` runtime
    /// running on `num_threads` OS threads, all named `name`.
    pub fn new(name: &str, num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let thread_name = name.to_string();
        let shutdown = Arc::new(Notify::new());
        let shutdown_captured = Arc::clone(&shutdown);

        let (tx, rx) = std::sync::mpsc::channel();
        let spawn_name = thread_name.clone();
        let thread = std::thread::Builder::new()
            .name(format!("{thread_name} driver"))
            .spawn(move || {
                lower_priority_if_supported();

                let runtime = Builder::new_multi_thread()
                    .worker_threads(num_threads)
                    .thread_name(spawn_name.clone())
                    .enable_all()
                    .build()
                    .expect("failed to build dedicated executor runtime");

                tx.send(runtime.handle().clone())
                    .expect("executor constructor dropped the receiver before thread started");

                info!(name = %spawn_name, num_threads, "dedicated executor started");
                runtime.block_on(shutdown_captured.notified());
                info!(name = %spawn_name, "dedicated executor draining");

                // give already-spawned tasks a chance to observe shutdown
                // and finish before the runtime is torn down.
                runtime.shutdown_background();
            })
            .expect("failed to spawn dedicated executor thread");

        let handle = rx
            .recv()
            .expect("dedicated executor thread exited before reporting its runtime handle");

        Self {
            shared: Arc::new(Shared {
                name: thread_name,
                handle: Mutex::new(Some(handle)),
                shutdown,
                thread: Mutex::new(Some(thread)),
            }),
        }
    }

    /// Spawn `task` onto this executor's thread pool.
    ///
    /// # Panics
    /// Panics if called after [`Self::shutdown`].
    pub fn spawn<T>(&self, task: T) -> JoinHandle<T::Output>
    where
        T: Future + Send + 'static,
        T::Output: Send + 'static,
    {
        let handle = self
            .shared
            .handle
            .lock()
            .as_ref()
            .expect("spawn called on a DedicatedExecutor after shutdown")
            .clone();
        handle.spawn(task)
    }

    /// Whether this executor is still accepting work.
    pub fn is_running(&self) -> bool {
        self.shared.handle.lock().is_some()
    }

    /// Initiates shutdown: the background runtime stops accepting new
    /// `tokio::spawn`s from its own tasks' perspective and begins
    /// unwinding, but already-`spawn`ed tasks are allowed to finish. Safe
    /// to call multiple times.
    pub fn shutdown(&self) {
        self.shared.handle.lock().take();
        self.shared.shutdown.notify_one();
    }

    /// Waits for the background thread to fully exit. Only the first call
    /// actually blocks (via `spawn_blocking`, so it does not block the
    /// calling reactor thread); subsequent calls return immediately.
    pub async fn join(&self) {
        self.shutdown();
        let thread = self.shared.thread.lock().take();
        if let Some(thread) = thread {
            let name = self.shared.name.clone();
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!(name, "dedicated executor thread panicked"),
                Err(_) => warn!(name, "join task itself panicked"),
            }
        }
    }
}

impl Drop for DedicatedExecutor {
    fn drop(&mut self) {
        // Best-effort: a clean shutdown should go through `join()`, but we
        // must not leak the background thread if the executor is simply
        // dropped.
        self.shutdown();
    }
}

#[cfg(unix)]
fn lower_priority_if_supported() {
    // Driver threads should not starve the process's other threads (e.g.
    // the RPC reactor accepting new tasks). `nice` is best-effort: a
    // failure (no permission) is not fatal.
    unsafe {
        let _ = libc::nice(5);
    }
}

#[cfg(not(unix))]
fn lower_priority_if_supported() {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn spawn_runs_on_dedicated_thread() {
        let exec = DedicatedExecutor::new("test executor", 2);
        let result = exec.spawn(async { 1 + 1 }).await.unwrap();
        assert_eq!(result, 2);
        exec.join().await;
    }

    #[tokio::test]
    async fn many_tasks_run_concurrently() {
        let exec = DedicatedExecutor::new("test executor", 4);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            handles.push(exec.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 16);
        exec.join().await;
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let exec = DedicatedExecutor::new("test executor", 1);
        exec.join().await;
        exec.join().await;
        assert!(!exec.is_running());
    }

    #[tokio::test]
    #[should_panic(expected = "after shutdown")]
    async fn spawn_after_shutdown_panics() {
        let exec = DedicatedExecutor::new("test executor", 1);
        exec.shutdown();
        exec.spawn(async {});
    }
}
