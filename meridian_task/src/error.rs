//! Failures surfaced by [`crate::task::Task`] (§4.8).

use meridian_rpc::ids::TaskInstanceId;
use snafu::Snafu;

/// An error a [`crate::task::Task`] refuses an operation with.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum TaskError {
    /// `assign_splits`, `cancel`, `abort`, or another mutating call arrived
    /// after the Task reached a terminal state (§8 property 7: terminal is
    /// sticky, later calls observe it rather than taking effect).
    #[snafu(display("task {task_id} is already terminal ({state})"))]
    AlreadyTerminal {
        /// The task this call targeted.
        task_id: TaskInstanceId,
        /// The terminal state it was already in.
        state: String,
    },

    /// `assign_splits` named a source operator id the Task was never built
    /// with.
    #[snafu(display("task {task_id} has no source numbered {source_id}"))]
    UnknownSource {
        /// The task this call targeted.
        task_id: TaskInstanceId,
        /// The offending source operator id.
        source_id: usize,
    },

    /// `assign_splits` arrived for a source already marked `noMoreSplits`.
    #[snafu(display("task {task_id} source {source_id} already marked no-more-splits"))]
    NoMoreSplits {
        /// The task this call targeted.
        task_id: TaskInstanceId,
        /// The source operator id that is closed to further assignment.
        source_id: usize,
    },
}
