//! Retry policy for a Stage's Tasks (§4.9).

use meridian_rpc::ids::{AttemptId, TaskInstanceId};

/// How the coordinator reacts to a retryable (`Internal`-category, §7)
/// Task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// No retries: the first Task failure fails the query (fail-fast).
    None,
    /// Retry a single failed Task up to `max_attempts` times with a fresh
    /// `attemptId`, preserving its split assignments.
    Task {
        /// Maximum number of attempts (including the first), `>= 1`.
        max_attempts: u32,
    },
    /// Fail the entire query, but allow the client to resubmit
    /// deterministically via a query hash.
    Query,
}

/// The outcome of reporting a Task failure to a
/// [`crate::stage::StageScheduler`] under its configured [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Retry as a fresh attempt of the same `(queryId, stageId, taskId)`,
    /// with its split assignments preserved.
    Retry(TaskInstanceId),
    /// No more retries are permitted for this Task; the query fails.
    FailQuery,
    /// The query should fail, but the client may deterministically
    /// resubmit it; carries a hash of the query's shape for the client to
    /// reuse as an idempotency key.
    ResubmitQuery {
        /// Deterministic hash of the query this failure ends.
        query_hash: u64,
    },
}

impl RetryPolicy {
    /// Decide what happens to a failed `task_id`, given how many attempts
    /// have already been made for its `(queryId, stageId, taskId)` triple
    /// (`prior_attempts`, `0` on the task's first failure) and a
    /// precomputed `query_hash` to surface on [`RetryOutcome::ResubmitQuery`].
    pub fn on_task_failure(
        &self,
        task_id: TaskInstanceId,
        prior_attempts: u32,
        query_hash: u64,
    ) -> RetryOutcome {
        match self {
            Self::None => RetryOutcome::FailQuery,
            Self::Task { max_attempts } => {
                if prior_attempts + 1 < *max_attempts {
                    RetryOutcome::Retry(TaskInstanceId {
                        attempt_id: AttemptId::new((prior_attempts + 1) as u64),
                        ..task_id
                    })
                } else {
                    RetryOutcome::FailQuery
                }
            }
            Self::Query => RetryOutcome::ResubmitQuery { query_hash },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_rpc::ids::{QueryId, StageId, TaskId};

    fn id(attempt: u64) -> TaskInstanceId {
        TaskInstanceId {
            query_id: QueryId::new(1),
            stage_id: StageId::new(0),
            task_id: TaskId::new(0),
            attempt_id: AttemptId::new(attempt),
        }
    }

    #[test]
    fn none_never_retries() {
        assert_eq!(RetryPolicy::None.on_task_failure(id(0), 0, 42), RetryOutcome::FailQuery);
    }

    #[test]
    fn task_policy_retries_up_to_max_attempts_then_fails() {
        let policy = RetryPolicy::Task { max_attempts: 3 };
        let first = policy.on_task_failure(id(0), 0, 0);
        assert_eq!(
            first,
            RetryOutcome::Retry(TaskInstanceId { attempt_id: AttemptId::new(1), ..id(0) })
        );
        let second = policy.on_task_failure(id(0), 1, 0);
        assert_eq!(
            second,
            RetryOutcome::Retry(TaskInstanceId { attempt_id: AttemptId::new(2), ..id(0) })
        );
        let third = policy.on_task_failure(id(0), 2, 0);
        assert_eq!(third, RetryOutcome::FailQuery);
    }

    #[test]
    fn query_policy_surfaces_resubmit_hash() {
        let outcome = RetryPolicy::Query.on_task_failure(id(0), 0, 99);
        assert_eq!(outcome, RetryOutcome::ResubmitQuery { query_hash: 99 });
    }
}
