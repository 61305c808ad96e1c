//! Identity newtypes shared by every component that names a Query, Stage,
//! Task, or Split (§3). Kept together in one place so the coordinator and
//! worker crates agree on the same wire-stable representation without
//! depending on each other.

use std::fmt;

macro_rules! id_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Construct from a raw value. Callers are responsible for
            /// uniqueness within their scope (e.g. a coordinator's query id
            /// generator).
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw numeric value.
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(QueryId, "Identifies a [Query](crate) for its whole lifetime.");
id_newtype!(StageId, "Identifies a Stage within a Query's stage DAG.");
id_newtype!(TaskId, "Identifies a Task within a Stage (before attempts).");
id_newtype!(
    AttemptId,
    "Distinguishes retried instances of the same (query, stage, task)."
);
id_newtype!(SplitId, "Identifies a single Split handed to a source Task.");
id_newtype!(NodeId, "Identifies a worker node the scheduler can place Tasks on.");
id_newtype!(TransactionId, "Identifies a coordinator-tracked Transaction.");
id_newtype!(ExchangeClientId, "Identifies one downstream client of an Output Buffer.");

/// The full `(queryId, stageId, taskId, attemptId)` identity of a worker-side
/// Task (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskInstanceId {
    /// The owning query.
    pub query_id: QueryId,
    /// The stage this task instantiates.
    pub stage_id: StageId,
    /// The task slot within the stage.
    pub task_id: TaskId,
    /// Which retry attempt this is; `0` for the first attempt.
    pub attempt_id: AttemptId,
}

impl fmt::Display for TaskInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.query_id, self.stage_id, self.task_id, self.attempt_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_instance_id_displays_dotted() {
        let id = TaskInstanceId {
            query_id: QueryId::new(1),
            stage_id: StageId::new(2),
            task_id: TaskId::new(3),
            attempt_id: AttemptId::new(0),
        };
        assert_eq!(id.to_string(), "1.2.3.0");
    }
}
