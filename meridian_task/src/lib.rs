//! [`Task`]: the worker-side container of Drivers, memory, and Output
//! Buffer for one stage instance (§3, §4.8).
//!
//! A Task exclusively owns its pipelines, their Drivers, its memory
//! context, and its Output Buffer; Drivers run on the worker-wide
//! [`DriverScheduler`] shared across every Task on the node. Split
//! assignment is append-only per source operator until that source is
//! marked `noMoreSplits`, and once a Task reaches a terminal state every
//! further mutating call is rejected rather than silently taking effect
//! (§8 property 7).

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod error;
pub mod status;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use meridian_driver::{Driver, DriverScheduler};
use meridian_error::FailureInfo;
use meridian_memory::LocalMemoryManager;
use meridian_metric::{Registry, U64Counter};
use meridian_output_buffer::buffer::{OutputBuffer, OutputBufferPolicy};
use meridian_rpc::ids::TaskInstanceId;
use meridian_rpc::split::Split;
use meridian_time::{SystemProvider, Time, TimeProvider};
use observability_deps::tracing::{debug, info, warn};
use parking_lot::Mutex;
use snafu::ensure;

pub use error::TaskError;
pub use status::{TaskState, TaskStatus};

use error::{AlreadyTerminalSnafu, NoMoreSplitsSnafu, UnknownSourceSnafu};

/// Append-only split bookkeeping for one source operator within a Task
/// (§3: "assigned splits (append-only until 'no more splits')").
#[derive(Debug, Default)]
struct SourceState {
    assigned: VecDeque<Split>,
    no_more_splits: bool,
}

#[derive(Debug)]
struct Inner {
    state: TaskState,
    sources: HashMap<usize, SourceState>,
    failure: Option<FailureInfo>,
    started_at: Option<Time>,
}

/// The worker-side instantiation of a Stage's Fragment (§3, §4.8).
///
/// Identity is `(queryId, stageId, taskId, attemptId)` (§3). A Task is
/// constructed `Planned`, handed its Driver chain via [`Task::start`]
/// (entering `Running`), and becomes terminal either when its last Driver
/// finishes and its Output Buffer drains (checked lazily on [`Task::status`]
/// and after every Driver completion), or explicitly via [`Task::cancel`],
/// [`Task::abort`], or [`Task::fail`].
#[derive(Debug)]
pub struct Task {
    id: TaskInstanceId,
    inner: Mutex<Inner>,
    output_buffer: Arc<OutputBuffer>,
    memory: Arc<LocalMemoryManager>,
    drivers_total: AtomicUsize,
    drivers_finished: Arc<AtomicUsize>,
    blocked_nanos: Arc<U64Counter>,
    time: Arc<dyn TimeProvider>,
}

impl Task {
    /// Construct a freshly `Planned` Task for `id`, with one split queue
    /// per id in `source_ids`, an Output Buffer of `output_clients` clients
    /// routed by `output_policy`, and a memory context capped at
    /// `memory_limit` bytes.
    pub fn new(
        id: TaskInstanceId,
        source_ids: impl IntoIterator<Item = usize>,
        output_policy: OutputBufferPolicy,
        output_clients: usize,
        memory_limit: i64,
        registry: &Registry,
    ) -> Arc<Self> {
        let sources = source_ids
            .into_iter()
            .map(|id| (id, SourceState::default()))
            .collect();
        let memory = Arc::new(LocalMemoryManager::new(
            memory_limit,
            "task_memory_bytes",
            registry,
        ));
        let output_buffer = Arc::new(OutputBuffer::new(
            output_policy,
            output_clients,
            Arc::clone(&memory),
            registry,
        ));
        Arc::new(Self {
            id,
            inner: Mutex::new(Inner {
                state: TaskState::Planned,
                sources,
                failure: None,
                started_at: None,
            }),
            output_buffer,
            memory,
            drivers_total: AtomicUsize::new(0),
            drivers_finished: Arc::new(AtomicUsize::new(0)),
            blocked_nanos: registry.counter("task_blocked_nanos"),
            time: Arc::new(SystemProvider::new()),
        })
    }

    /// Construct a Task with no metrics registry attachment, for tests.
    pub fn for_test(
        id: TaskInstanceId,
        source_ids: impl IntoIterator<Item = usize>,
        output_policy: OutputBufferPolicy,
        output_clients: usize,
        memory_limit: i64,
    ) -> Arc<Self> {
        Self::new(
            id,
            source_ids,
            output_policy,
            output_clients,
            memory_limit,
            &Registry::new(),
        )
    }

    /// This Task's full `(queryId, stageId, taskId, attemptId)` identity.
    pub fn id(&self) -> TaskInstanceId {
        self.id
    }

    /// This Task's Output Buffer, shared with its Exchange Client readers.
    pub fn output_buffer(&self) -> &Arc<OutputBuffer> {
        &self.output_buffer
    }

    /// This Task's memory context (§4.3), shared by its Output Buffer and
    /// whatever other exchanges its pipelines create.
    pub fn memory(&self) -> &Arc<LocalMemoryManager> {
        &self.memory
    }

    /// Append `splits` to `source_id`'s queue (§3, §4.8). Rejected once the
    /// Task is terminal, the source is unknown, or that source was already
    /// marked [`Task::mark_no_more_splits`].
    pub fn assign_splits(&self, source_id: usize, splits: Vec<Split>) -> Result<(), TaskError> {
        let mut inner = self.inner.lock();
        Self::reject_if_terminal(self.id, &inner)?;
        let source = inner
            .sources
            .get_mut(&source_id)
            .ok_or_else(|| UnknownSourceSnafu { task_id: self.id, source_id }.build())?;
        ensure!(
            !source.no_more_splits,
            NoMoreSplitsSnafu { task_id: self.id, source_id }
        );
        source.assigned.extend(splits);
        Ok(())
    }

    /// Mark `source_id` as closed to further split assignment (§4.8).
    pub fn mark_no_more_splits(&self, source_id: usize) -> Result<(), TaskError> {
        let mut inner = self.inner.lock();
        Self::reject_if_terminal(self.id, &inner)?;
        let source = inner
            .sources
            .get_mut(&source_id)
            .ok_or_else(|| UnknownSourceSnafu { task_id: self.id, source_id }.build())?;
        source.no_more_splits = true;
        debug!(task_id = %self.id, source_id, "source marked no-more-splits");
        Ok(())
    }

    /// Splits assigned to `source_id` so far that a Scan operator wired
    /// against this Task has not yet consumed, drained in FIFO order.
    /// Returns `None` for an unknown source.
    pub fn take_assigned_split(&self, source_id: usize) -> Option<Split> {
        self.inner
            .lock()
            .sources
            .get_mut(&source_id)
            .and_then(|s| s.assigned.pop_front())
    }

    /// Whether `source_id` will never receive another split (§4.8).
    /// Returns `false` for an unknown source.
    pub fn source_no_more_splits(&self, source_id: usize) -> bool {
        self.inner
            .lock()
            .sources
            .get(&source_id)
            .map(|s| s.no_more_splits)
            .unwrap_or(false)
    }

    /// Hand the Task its built pipelines and submit each Driver to the
    /// shared worker `scheduler`, transitioning `Planned` → `Running`
    /// (§4.8). Every Driver is cancelled the moment this Task reaches a
    /// terminal state (§4.5, §5), observed at the Driver's next quantum
    /// boundary.
    ///
    /// # Panics
    /// Panics if the Task is not currently `Planned` (started twice, or
    /// started after being cancelled/aborted/failed before ever running).
    pub fn start(self: &Arc<Self>, drivers: Vec<Driver>, scheduler: &DriverScheduler) {
        {
            let mut inner = self.inner.lock();
            assert_eq!(
                inner.state,
                TaskState::Planned,
                "Task::start called on a task that is not Planned"
            );
            inner.state = TaskState::Running;
            inner.started_at = Some(self.time.now());
        }

        self.drivers_total.store(drivers.len(), Ordering::Release);
        info!(task_id = %self.id, drivers = drivers.len(), "task started");

        let mut handles = Vec::with_capacity(drivers.len());
        for driver in drivers {
            let task_for_cancel = Arc::clone(self);
            let handle = scheduler.submit_tracked(
                self.id.query_id,
                driver,
                move || task_for_cancel.inner.lock().state.is_terminal(),
                Some(Arc::clone(&self.blocked_nanos)),
            );
            handles.push(handle);
        }

        let task = Arc::clone(self);
        tokio::spawn(async move {
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(task_id = %task.id, %err, "driver task panicked");
                }
                task.drivers_finished.fetch_add(1, Ordering::AcqRel);
            }
            task.maybe_finish();
        });
    }

    /// Cancel the Task: stop its Drivers at their next quantum boundary
    /// and mark it terminal. Unlike [`Task::abort`], buffered-but-
    /// unacknowledged Output Buffer pages remain readable (§6's `DELETE
    /// .../task/{taskId}` with `abort=false`).
    pub fn cancel(&self) -> Result<(), TaskError> {
        self.transition_terminal(TaskState::Canceled, None, false)
    }

    /// Abort the Task: stop its Drivers and immediately destroy its Output
    /// Buffer, discarding whatever is still buffered (§6's `DELETE
    /// .../task/{taskId}` with `abort=true`).
    pub fn abort(&self) -> Result<(), TaskError> {
        self.transition_terminal(TaskState::Aborted, None, true)
    }

    /// Fail the Task with `failure`, stopping its Drivers and destroying
    /// its Output Buffer, same as [`Task::abort`] but recording the cause
    /// (§4.8, §7).
    pub fn fail(&self, failure: FailureInfo) -> Result<(), TaskError> {
        self.transition_terminal(TaskState::Failed, Some(failure), true)
    }

    fn transition_terminal(
        &self,
        target: TaskState,
        failure: Option<FailureInfo>,
        destroy_buffer: bool,
    ) -> Result<(), TaskError> {
        {
            let mut inner = self.inner.lock();
            Self::reject_if_terminal(self.id, &inner)?;
            inner.state = target;
            inner.failure = failure;
        }
        if destroy_buffer {
            self.output_buffer.destroy();
        }
        info!(task_id = %self.id, state = %target, "task reached terminal state");
        Ok(())
    }

    /// Re-check whether every Driver has finished and the Output Buffer
    /// has fully drained, transitioning `Running` → `Finished` if so
    /// (§4.8's termination condition). A no-op if the Task is not
    /// currently `Running` or the condition does not yet hold.
    fn maybe_finish(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TaskState::Running
            && self.drivers_finished.load(Ordering::Acquire) >= self.drivers_total.load(Ordering::Acquire)
            && self.output_buffer.is_drained()
        {
            inner.state = TaskState::Finished;
            debug!(task_id = %self.id, "task finished");
        }
    }

    fn reject_if_terminal(task_id: TaskInstanceId, inner: &Inner) -> Result<(), TaskError> {
        ensure!(
            !inner.state.is_terminal(),
            AlreadyTerminalSnafu { task_id, state: inner.state.to_string() }
        );
        Ok(())
    }

    /// The heartbeat payload reported on each status poll (§4.8, §6's
    /// long-polling `GET /v1/task/{taskId}`). Re-evaluates
    /// [`Self::maybe_finish`] first, so a caller polling in a loop
    /// eventually observes `Finished` without any other trigger.
    pub fn status(&self) -> TaskStatus {
        self.maybe_finish();
        let inner = self.inner.lock();
        TaskStatus {
            state: inner.state,
            drivers_finished: self.drivers_finished.load(Ordering::Acquire),
            drivers_total: self.drivers_total.load(Ordering::Acquire),
            output_buffer_bytes: self.memory.usage().max(0) as u64,
            output_buffer_complete: self.output_buffer.is_drained(),
            blocked_time: std::time::Duration::from_nanos(self.blocked_nanos.fetch()),
            failure: inner.failure.clone(),
        }
    }

    /// Whether this Task has reached any terminal state.
    pub fn is_terminal(&self) -> bool {
        self.inner.lock().state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_operator::variants::{LimitOperator, OutputOperator, ValuesOperator};
    use meridian_operator::Operator;
    use meridian_page::block::{Block, FixedWidthBlock};
    use meridian_page::page::Page;
    use meridian_rpc::ids::{AttemptId, QueryId, StageId, TaskId};
    use std::time::Duration;

    fn task_id(n: u64) -> TaskInstanceId {
        TaskInstanceId {
            query_id: QueryId::new(n),
            stage_id: StageId::new(0),
            task_id: TaskId::new(0),
            attempt_id: AttemptId::new(0),
        }
    }

    fn int_page(values: &[i64]) -> Page {
        Page::new(vec![Block::LongArray(
            FixedWidthBlock::new(values.to_vec(), None).unwrap(),
        )])
    }

    fn output_driver(task: &Arc<Task>, pages: Vec<Page>) -> Driver {
        let values = ValuesOperator::new(pages);
        let buf = Arc::clone(task.output_buffer());
        let buf_finish = Arc::clone(&buf);
        let output = OutputOperator::new(
            Box::new(move |p| {
                let _ = buf.enqueue(0, p);
            }),
            Box::new(move || buf_finish.set_no_more_pages()),
        );
        Driver::new(vec![Operator::Values(values), Operator::Output(output)])
    }

    #[tokio::test]
    async fn split_assignment_is_append_only_until_no_more_splits() {
        let task = Task::for_test(task_id(1), [0], OutputBufferPolicy::Partitioned, 1, 1_000_000);
        task.assign_splits(0, vec![Split::new(meridian_rpc::ids::SplitId::new(1), vec![], vec![])])
            .unwrap();
        task.mark_no_more_splits(0).unwrap();
        let err = task
            .assign_splits(0, vec![Split::new(meridian_rpc::ids::SplitId::new(2), vec![], vec![])])
            .unwrap_err();
        assert!(matches!(err, TaskError::NoMoreSplits { .. }));
        assert!(task.take_assigned_split(0).is_some());
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let task = Task::for_test(task_id(2), [0], OutputBufferPolicy::Partitioned, 1, 1_000_000);
        let err = task.assign_splits(7, vec![]).unwrap_err();
        assert!(matches!(err, TaskError::UnknownSource { source_id: 7, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn task_runs_a_driver_and_becomes_finished_once_buffer_drains() {
        let registry = Registry::new();
        let scheduler = DriverScheduler::new(
            meridian_driver::DriverSchedulerConfig {
                quantum: Duration::from_millis(20),
                num_threads: 2,
            },
            &registry,
        );
        let task = Task::for_test(task_id(3), [], OutputBufferPolicy::Partitioned, 1, 1_000_000);

        let driver = output_driver(&task, vec![int_page(&[1, 2, 3])]);
        task.start(vec![driver], &scheduler);

        assert_eq!(task.status().state, TaskState::Running);

        // Buffer won't drain until a client reads and acknowledges it.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if task.status().state == TaskState::Finished {
                break;
            }
            let client = meridian_rpc::ids::ExchangeClientId::new(0);
            if let Ok(r) = task.output_buffer().get(client, 0, u64::MAX) {
                if !r.pages.is_empty() {
                    task.output_buffer().acknowledge(client, r.next_seq).unwrap();
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "task never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        scheduler.join().await;
    }

    #[tokio::test]
    async fn terminal_state_is_sticky_and_rejects_further_calls() {
        let task = Task::for_test(task_id(4), [0], OutputBufferPolicy::Partitioned, 1, 1_000_000);
        task.cancel().unwrap();
        assert!(task.is_terminal());
        assert_eq!(task.status().state, TaskState::Canceled);

        let err = task.assign_splits(0, vec![]).unwrap_err();
        assert!(matches!(err, TaskError::AlreadyTerminal { .. }));
        let err = task.cancel().unwrap_err();
        assert!(matches!(err, TaskError::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn abort_destroys_the_output_buffer_immediately() {
        let task = Task::for_test(task_id(5), [], OutputBufferPolicy::Partitioned, 1, 1_000_000);
        let page = int_page(&[1]);
        task.output_buffer().enqueue(0, page).unwrap();
        task.abort().unwrap();

        let client = meridian_rpc::ids::ExchangeClientId::new(0);
        let r = task.output_buffer().get(client, 0, u64::MAX).unwrap();
        assert!(r.buffer_complete);
    }

    #[tokio::test]
    async fn fail_records_the_failure_info() {
        let task = Task::for_test(task_id(6), [], OutputBufferPolicy::Partitioned, 1, 1_000_000);
        task.fail(FailureInfo::new(
            meridian_error::ErrorCategory::Internal,
            meridian_error::codes::MALFORMED_PAGE,
            "MALFORMED_PAGE",
            "bad block",
        ))
        .unwrap();

        let status = task.status();
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.failure.unwrap().message, "bad block");
    }
}
