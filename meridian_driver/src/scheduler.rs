//! The Driver Scheduler (§4.5): a FIFO ready queue of Drivers, time-sliced
//! into quanta and mapped onto a worker-wide [`DedicatedExecutor`] thread
//! pool. Admission is delegated to a pluggable [`AdmissionPolicy`] so
//! resource-group-aware dispatch can be layered in later without touching
//! this scheduler (§4.5, §9 "pluggable admission policy decides dispatch").
//!
//! Fairness (§4.5, §5): a Driver that reports [`DriverState::Blocked`] is
//! parked on its future rather than busy-polled, and re-queued the instant
//! that future resolves. `tokio::task::yield_now` between quanta lets every
//! other Driver on the same executor thread get a turn before this one
//! runs again, which is this scheduler's FIFO-ready-queue behavior: no
//! single Driver's `spawn`ed task can hog a worker thread across quanta.

use std::sync::Arc;
use std::time::Duration;

use executor::DedicatedExecutor;
use meridian_metric::{Registry, U64Counter};
use meridian_rpc::ids::QueryId;
use meridian_time::{SystemProvider, TimeProvider};
use observability_deps::tracing::debug;
use tokio::task::JoinHandle;

use crate::admission::{AdmissionPolicy, Unrestricted};
use crate::driver::{Driver, DriverState};

fn default_num_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Tunables for a [`DriverScheduler`].
#[derive(Debug, Clone)]
pub struct DriverSchedulerConfig {
    /// Length of one scheduling quantum (§4.5 default ~1s).
    pub quantum: Duration,
    /// Number of dedicated driver threads backing the scheduler. Defaults
    /// to the number of available cores, per §5's "fixed pool of driver
    /// threads (default = cores)".
    pub num_threads: usize,
}

impl Default for DriverSchedulerConfig {
    fn default() -> Self {
        Self {
            quantum: Duration::from_secs(1),
            num_threads: default_num_threads(),
        }
    }
}

/// Runs Drivers to completion on a dedicated, worker-wide thread pool,
/// time-sliced into quanta and parked on their blocking future between
/// quanta (§4.5). One `DriverScheduler` is shared by every query running on
/// a worker; [`AdmissionPolicy`] is the seam a resource-group-aware
/// dispatcher would hook into without this type changing.
#[derive(Debug)]
pub struct DriverScheduler {
    executor: DedicatedExecutor,
    config: DriverSchedulerConfig,
    admission: Arc<dyn AdmissionPolicy>,
    time: Arc<dyn TimeProvider>,
    quanta_run: Arc<U64Counter>,
}

impl DriverScheduler {
    /// Construct a scheduler admitting every query ([`Unrestricted`]),
    /// backed by `config.num_threads` driver threads and the system clock.
    pub fn new(config: DriverSchedulerConfig, registry: &Registry) -> Self {
        Self::with_admission(config, Arc::new(Unrestricted), registry)
    }

    /// Construct a scheduler with an explicit admission policy.
    pub fn with_admission(
        config: DriverSchedulerConfig,
        admission: Arc<dyn AdmissionPolicy>,
        registry: &Registry,
    ) -> Self {
        let executor = DedicatedExecutor::new("driver", config.num_threads);
        Self {
            executor,
            config,
            admission,
            time: Arc::new(SystemProvider::new()),
            quanta_run: registry.counter("driver_quanta_run"),
        }
    }

    /// Override the clock, for tests that need deterministic quantum
    /// timing via a `MockProvider`. Only meaningful before the first
    /// [`Self::submit`] call.
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Submit a fully-built Driver belonging to `query_id` to the ready
    /// queue. `is_cancelled` is polled at each quantum boundary (§4.5
    /// "Drivers observe this at the next quantum boundary and release
    /// resources"); once it reports `true` the Driver is closed and the
    /// task exits without waiting for the chain to finish naturally.
    ///
    /// Returns a handle that resolves once the Driver reaches
    /// [`DriverState::Finished`] or cancellation is observed.
    pub fn submit(
        &self,
        query_id: QueryId,
        driver: Driver,
        is_cancelled: impl Fn() -> bool + Send + 'static,
    ) -> JoinHandle<()> {
        self.submit_tracked(query_id, driver, is_cancelled, None)
    }

    /// Like [`Self::submit`], additionally accumulating the total time this
    /// Driver spent parked on a [`DriverState::Blocked`] future into
    /// `blocked_nanos` — the "blocked time" a Task reports on its heartbeat
    /// (§4.8).
    pub fn submit_tracked(
        &self,
        query_id: QueryId,
        mut driver: Driver,
        is_cancelled: impl Fn() -> bool + Send + 'static,
        blocked_nanos: Option<Arc<U64Counter>>,
    ) -> JoinHandle<()> {
        let quantum = self.config.quantum;
        let admission = Arc::clone(&self.admission);
        let time = Arc::clone(&self.time);
        let quanta_run = Arc::clone(&self.quanta_run);

        self.executor.spawn(async move {
            loop {
                if is_cancelled() {
                    debug!(%query_id, "driver observed cancellation at quantum boundary");
                    driver.close();
                    return;
                }
                if !admission.admit(query_id) {
                    tokio::task::yield_now().await;
                    continue;
                }

                match driver.process(quantum, time.as_ref()) {
                    DriverState::Finished => {
                        quanta_run.inc(1);
                        driver.close();
                        return;
                    }
                    DriverState::MadeProgress | DriverState::NoProgress => {
                        quanta_run.inc(1);
                        tokio::task::yield_now().await;
                    }
                    DriverState::Blocked(fut) => {
                        quanta_run.inc(1);
                        if let Some(counter) = &blocked_nanos {
                            let started = time.now();
                            fut.await;
                            let elapsed = time.now().duration_since(started);
                            counter.inc(elapsed.as_nanos() as u64);
                        } else {
                            fut.await;
                        }
                    }
                }
            }
        })
    }

    /// Number of quanta run across every Driver this scheduler has ever
    /// dispatched.
    pub fn quanta_run(&self) -> u64 {
        self.quanta_run.fetch()
    }

    /// Gracefully drain the underlying thread pool, waiting for all
    /// already-submitted Drivers to finish.
    pub async fn join(&self) {
        self.executor.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_operator::variants::{LimitOperator, ValuesOperator};
    use meridian_operator::Operator;
    use meridian_page::block::{Block, FixedWidthBlock};
    use meridian_page::page::Page;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn int_page(values: &[i64]) -> Page {
        Page::new(vec![Block::LongArray(
            FixedWidthBlock::new(values.to_vec(), None).unwrap(),
        )])
    }

    #[tokio::test]
    async fn runs_a_driver_to_completion() {
        let registry = Registry::new();
        let scheduler = DriverScheduler::new(
            DriverSchedulerConfig {
                quantum: Duration::from_millis(50),
                num_threads: 2,
            },
            &registry,
        );

        let values = ValuesOperator::new(vec![int_page(&[1, 2, 3])]);
        let limit = LimitOperator::new(2);
        let driver = Driver::new(vec![Operator::Values(values), Operator::Limit(limit)]);

        let handle = scheduler.submit(QueryId::new(1), driver, || false);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("driver should finish")
            .expect("driver task should not panic");

        assert!(scheduler.quanta_run() >= 1);
        scheduler.join().await;
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_a_quantum_boundary() {
        let registry = Registry::new();
        let scheduler = DriverScheduler::new(DriverSchedulerConfig::default(), &registry);

        // A driver chain that always has output to move never finishes on
        // its own; only cancellation ends the submitted task.
        let pages: Vec<_> = (0..1000).map(|i| int_page(&[i])).collect();
        let values = ValuesOperator::new(pages);
        let limit = LimitOperator::new(usize::MAX);
        let driver = Driver::new(vec![Operator::Values(values), Operator::Limit(limit)]);

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let handle = scheduler.submit(QueryId::new(2), driver, move || flag.load(Ordering::Acquire));

        cancelled.store(true, Ordering::Release);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancelled driver should stop promptly")
            .expect("driver task should not panic");

        scheduler.join().await;
    }
}
