//! [`LocalMemoryManager`]: bounded buffer accounting with future-based
//! backpressure (§4.3). Every local exchange and output buffer shares one of
//! these to know when it has outgrown its memory budget and callers that
//! add bytes should wait rather than push further.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use meridian_metric::{Registry, U64Gauge};
use meridian_rpc::traits::{not_blocked, BlockedFuture};
use observability_deps::tracing::trace;
use tokio::sync::watch;

/// Accounts for buffered bytes within a single exchange or pipeline context
/// (§4.3). `update` is lock-free; `not_full_future` hands back a future that
/// resolves once usage drops to or below `limit`.
///
/// Internally a `watch` channel carries the current "is usage at or below
/// limit" boolean: every caller blocked on [`Self::not_full_future`]
/// subscribes to the same channel, so a single `update` crossing the
/// threshold wakes every waiter in one broadcast rather than each waiter
/// re-deriving its own wakeup source.
pub struct LocalMemoryManager {
    usage: AtomicI64,
    limit: i64,
    not_full_tx: watch::Sender<bool>,
    not_full_rx: watch::Receiver<bool>,
    bytes_buffered: Arc<U64Gauge>,
}

impl fmt::Debug for LocalMemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMemoryManager")
            .field("usage", &self.usage.load(Ordering::Relaxed))
            .field("limit", &self.limit)
            .finish()
    }
}

impl LocalMemoryManager {
    /// Construct a manager with a byte `limit`, registering its buffered-byte
    /// gauge under `metric_name` in `registry`.
    pub fn new(limit: i64, metric_name: &'static str, registry: &Registry) -> Self {
        let (not_full_tx, not_full_rx) = watch::channel(true);
        Self {
            usage: AtomicI64::new(0),
            limit,
            not_full_tx,
            not_full_rx,
            bytes_buffered: registry.gauge(metric_name),
        }
    }

    /// Construct a manager with no metrics registry attachment, for tests
    /// that only care about the accounting/backpressure behavior.
    pub fn for_test(limit: i64) -> Self {
        Self::new(limit, "bytes_buffered_test", &Registry::new())
    }

    /// The configured byte limit.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Current usage in bytes. Never negative in steady state; see
    /// [`Self::update`].
    pub fn usage(&self) -> i64 {
        self.usage.load(Ordering::Relaxed)
    }

    /// Atomically adjust usage by `delta` (negative on release). Panics if
    /// this would drive usage negative: per §4.3 that is a fatal
    /// programming bug (a release without a matching prior add), not a
    /// recoverable condition.
    pub fn update(&self, delta: i64) {
        let new_usage = self.usage.fetch_add(delta, Ordering::AcqRel) + delta;
        assert!(
            new_usage >= 0,
            "memory usage underflowed to {new_usage} (delta {delta})"
        );
        self.bytes_buffered.set(new_usage as u64);
        trace!(delta, new_usage, limit = self.limit, "memory usage updated");

        let not_full = new_usage <= self.limit;
        // `send_if_modified` avoids waking waiters on every update once
        // we're settled on one side of the threshold.
        self.not_full_tx.send_if_modified(|cur| {
            if *cur != not_full {
                *cur = not_full;
                true
            } else {
                false
            }
        });
    }

    /// A future that resolves once [`Self::usage`] is at or below `limit`.
    /// Already-resolved if currently below limit (§4.3).
    pub fn not_full_future(&self) -> BlockedFuture {
        if self.usage() <= self.limit {
            return not_blocked();
        }
        let mut rx = self.not_full_rx.clone();
        Box::pin(async move {
            loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Sender (the manager) was dropped; nothing more can
                    // change usage, so unblock rather than hang forever.
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn update_tracks_usage_and_rejects_underflow() {
        let mgr = LocalMemoryManager::for_test(100);
        mgr.update(40);
        assert_eq!(mgr.usage(), 40);
        mgr.update(-40);
        assert_eq!(mgr.usage(), 0);
    }

    #[test]
    #[should_panic(expected = "underflowed")]
    fn update_past_zero_panics() {
        let mgr = LocalMemoryManager::for_test(100);
        mgr.update(-1);
    }

    #[tokio::test]
    async fn not_full_future_resolves_immediately_below_limit() {
        let mgr = LocalMemoryManager::for_test(100);
        mgr.update(10);
        tokio::time::timeout(Duration::from_millis(50), mgr.not_full_future())
            .await
            .expect("future should already be resolved");
    }

    #[tokio::test]
    async fn not_full_future_resolves_once_usage_drops_below_limit() {
        let mgr = Arc::new(LocalMemoryManager::for_test(100));
        mgr.update(150);
        let fut = mgr.not_full_future();

        let waiter = tokio::spawn(fut);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        mgr.update(-100);
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should resolve after usage dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn multiple_waiters_share_one_wakeup() {
        let mgr = Arc::new(LocalMemoryManager::for_test(10));
        mgr.update(50);

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let mgr = Arc::clone(&mgr);
            waiters.push(tokio::spawn(async move { mgr.not_full_future().await }));
        }
        tokio::task::yield_now().await;

        mgr.update(-45);
        for w in waiters {
            tokio::time::timeout(Duration::from_millis(200), w)
                .await
                .expect("every waiter should resolve")
                .unwrap();
        }
    }

    #[test]
    fn accounting_balances_after_full_release() {
        let mgr = LocalMemoryManager::for_test(1_000);
        let deltas = [37, 12, 900, -37, -12, -900];
        for d in deltas {
            mgr.update(d);
        }
        assert_eq!(mgr.usage(), 0);
    }
}
