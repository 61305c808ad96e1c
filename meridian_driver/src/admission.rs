//! Admission seam for the Driver Scheduler (§4.5: "a pluggable admission
//! policy across queries"). Resource-group based admission is out of scope
//! for this core; this trait exists so the scheduler has a real extension
//! point rather than a hard-coded FIFO-only path.

use meridian_rpc::ids::QueryId;

/// Decides whether a query's Drivers may be scheduled right now.
///
/// Implementations must be cheap and non-blocking: the scheduler calls
/// [`Self::admit`] once per dequeue, on the hot path.
pub trait AdmissionPolicy: std::fmt::Debug + Send + Sync {
    /// Whether a Driver belonging to `query_id` may run its next quantum.
    fn admit(&self, query_id: QueryId) -> bool;
}

/// Admits every query unconditionally. The only policy this core ships;
/// resource-group-aware admission is a coordinator-side concern out of
/// scope here (§1 Non-goals).
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

impl AdmissionPolicy for Unrestricted {
    fn admit(&self, _query_id: QueryId) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_always_admits() {
        let policy = Unrestricted;
        assert!(policy.admit(QueryId::new(1)));
        assert!(policy.admit(QueryId::new(u64::MAX)));
    }
}
