//! [`TaskState`] and [`TaskStatus`]: the state machine and heartbeat report
//! shape a Task exposes to the coordinator (§4.8).

use std::time::Duration;

use meridian_error::FailureInfo;

/// A Task's lifecycle state (§4.8). `Planned` is the only non-terminal
/// state besides `Running`; every other variant is sticky — once entered,
/// [`TaskState::is_terminal`] is `true` forever (§8 property 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed but not yet handed its pipelines via
    /// [`crate::task::Task::start`].
    Planned,
    /// Pipelines submitted to the [`meridian_driver::DriverScheduler`] and
    /// running.
    Running,
    /// Every Driver finished and the Output Buffer drained and
    /// acknowledged (§4.8's termination condition).
    Finished,
    /// Canceled by the coordinator before completion.
    Canceled,
    /// Aborted: canceled with immediate buffer teardown (§6's
    /// `DELETE .../task/{taskId}` with `abort=true`).
    Aborted,
    /// An operator error could not be retried away (§4.8, §7).
    Failed,
}

impl TaskState {
    /// Whether this state is sticky: once reached, the Task accepts no
    /// further lifecycle transitions (§8 property 7).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Canceled | Self::Aborted | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planned => "PLANNED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Canceled => "CANCELED",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The heartbeat payload a Task reports on each status poll (§4.8, §6's
/// long-polling `GET /v1/task/{taskId}`).
#[derive(Debug, Clone)]
pub struct TaskStatus {
    /// Current lifecycle state.
    pub state: TaskState,
    /// How many of this task's Drivers have reached
    /// [`meridian_driver::DriverState::Finished`].
    pub drivers_finished: usize,
    /// Total Drivers this task was started with.
    pub drivers_total: usize,
    /// Bytes currently retained by the task's Output Buffer.
    pub output_buffer_bytes: u64,
    /// Whether the Output Buffer is fully drained and acknowledged.
    pub output_buffer_complete: bool,
    /// Cumulative time any of this task's Drivers spent parked on a
    /// blocking future, since the task started.
    pub blocked_time: Duration,
    /// Set once the task enters [`TaskState::Failed`].
    pub failure: Option<FailureInfo>,
}
