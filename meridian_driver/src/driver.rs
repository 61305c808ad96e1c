//! The Driver's `process()` loop (§4.5):
//!
//! 1. If any operator is blocked, return the composite blocking future.
//! 2. Walk the chain: while the downstream operator needs input and the
//!    upstream has output, move one page downstream.
//! 3. If an operator reports `finish`, propagate it to its downstream
//!    neighbor.
//! 4. Return when the chain makes no forward progress, is fully finished,
//!    or a bounded time slice elapses.

use std::task::{Context, Poll};
use std::time::Duration;

use futures::task::noop_waker;
use meridian_operator::Operator;
use meridian_rpc::traits::BlockedFuture;
use meridian_time::{Time, TimeProvider};

/// The outcome of one [`Driver::process`] call.
#[derive(Debug)]
pub enum DriverState {
    /// No operator in the chain is blocked, but a full quantum elapsed
    /// while still making forward progress. Re-schedule immediately.
    MadeProgress,
    /// The chain moved no pages and propagated no `finish` this call; all
    /// operators are either finished or waiting on each other in a way
    /// that will not change without outside input. Re-schedule; this is
    /// not itself an error (e.g. the first call on a freshly-built chain
    /// whose source hasn't been handed any splits yet).
    NoProgress,
    /// An operator reported it cannot make progress yet. The caller should
    /// park this Driver and re-queue it once the future resolves.
    Blocked(BlockedFuture),
    /// The last operator in the chain is finished; this Driver is done and
    /// should be dropped (after [`Driver::close`]).
    Finished,
}

/// A linear chain of operators driven one quantum at a time (§4.4, §4.5).
/// Execution within a single `Driver` is strictly single-threaded: operators
/// never run concurrently with each other, only `Driver`s run concurrently
/// with one another (via [`crate::DriverScheduler`]).
#[derive(Debug)]
pub struct Driver {
    operators: Vec<Operator>,
}

impl Driver {
    /// Build a Driver from its operator chain, source-to-sink.
    ///
    /// # Panics
    /// Panics if `operators` is empty; a Driver with no stages cannot make
    /// or report progress.
    pub fn new(operators: Vec<Operator>) -> Self {
        assert!(!operators.is_empty(), "a Driver needs at least one operator");
        Self { operators }
    }

    /// Whether the chain has fully finished: the last operator (the sink)
    /// reports no more output will ever be produced.
    pub fn is_finished(&self) -> bool {
        self.operators
            .last()
            .expect("constructor guarantees at least one operator")
            .is_finished()
    }

    /// Release every operator's resources. Idempotent; call once the
    /// Driver is dropped from the scheduler, whether it finished normally
    /// or was cancelled mid-stream.
    pub fn close(&mut self) {
        for op in &mut self.operators {
            op.close();
        }
    }

    /// Run the chain for up to `quantum`, per the four-step algorithm
    /// above. `time` supplies the quantum deadline so tests can drive it
    /// deterministically via a `MockProvider`.
    pub fn process(&mut self, quantum: Duration, time: &dyn TimeProvider) -> DriverState {
        let deadline_start = time.now();

        loop {
            if let Some(blocked) = self.collect_blocked() {
                return DriverState::Blocked(blocked);
            }

            if self.is_finished() {
                return DriverState::Finished;
            }

            if !self.step_once() {
                return DriverState::NoProgress;
            }

            if Self::quantum_elapsed(deadline_start, quantum, time) {
                return DriverState::MadeProgress;
            }
        }
    }

    fn quantum_elapsed(start: Time, quantum: Duration, time: &dyn TimeProvider) -> bool {
        time.now().duration_since(start) >= quantum
    }

    /// Step 1: poll every operator's blocking future once. Operators that
    /// are not currently blocked contribute nothing; operators that are
    /// blocked contribute their future to a join, so the Driver is
    /// re-queued only once *every* blocked stage can proceed.
    fn collect_blocked(&self) -> Option<BlockedFuture> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut pending = Vec::new();
        for op in &self.operators {
            let mut fut = op.is_blocked();
            if matches!(fut.as_mut().poll(&mut cx), Poll::Pending) {
                pending.push(fut);
            }
        }

        match pending.len() {
            0 => None,
            1 => pending.pop(),
            _ => {
                use futures::FutureExt;
                let joined = futures::future::join_all(pending).map(|_| ());
                Some(Box::pin(joined))
            }
        }
    }

    /// Steps 2-3: walk adjacent operator pairs once, moving at most one
    /// page across each boundary and propagating `finish` where the
    /// upstream side is exhausted. Returns whether any boundary made
    /// progress.
    fn step_once(&mut self) -> bool {
        let mut progressed = false;
        let len = self.operators.len();

        for i in 0..len.saturating_sub(1) {
            let (left, right) = self.operators.split_at_mut(i + 1);
            let upstream = &mut left[i];
            let downstream = &mut right[0];

            if !downstream.needs_input() {
                continue;
            }

            if let Some(page) = upstream.get_output() {
                downstream.add_input(page);
                progressed = true;
            } else if upstream.is_finished() {
                downstream.finish();
            }
        }

        progressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_operator::variants::{FilterOperator, LimitOperator, ValuesOperator};
    use meridian_page::block::{Block, FixedWidthBlock};
    use meridian_page::page::Page;
    use meridian_time::MockProvider;
    use std::sync::Arc;

    fn int_page(values: &[i64]) -> Page {
        Page::new(vec![Block::LongArray(
            FixedWidthBlock::new(values.to_vec(), None).unwrap(),
        )])
    }

    #[test]
    fn drains_a_source_through_a_limit_to_completion() {
        let values = ValuesOperator::new(vec![int_page(&[1, 2, 3]), int_page(&[4, 5])]);
        let limit = LimitOperator::new(4);

        let mut driver = Driver::new(vec![Operator::Values(values), Operator::Limit(limit)]);
        let time = MockProvider::new(Time::ZERO);

        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 1000, "driver did not converge");
            match driver.process(Duration::from_millis(50), &time) {
                DriverState::Finished => break,
                DriverState::Blocked(fut) => {
                    let _ = futures::executor::block_on(fut);
                }
                DriverState::MadeProgress | DriverState::NoProgress => {
                    time.inc(Duration::from_millis(60));
                }
            }
        }
        assert!(driver.is_finished());
    }

    #[test]
    fn single_operator_chain_reports_finished_immediately() {
        let values = ValuesOperator::new(Vec::new());
        let mut driver = Driver::new(vec![Operator::Values(values)]);
        let time = MockProvider::new(Time::ZERO);
        match driver.process(Duration::from_secs(1), &time) {
            DriverState::Finished => {}
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[test]
    fn quantum_elapsing_mid_progress_yields_made_progress() {
        // A long chain of no-op filters that always has a page to move
        // keeps reporting progress; a short quantum must cut it off
        // rather than spin forever inside one `process` call.
        let pages: Vec<_> = (0..10).map(|i| int_page(&[i])).collect();
        let values = ValuesOperator::new(pages);
        let pass = FilterOperator::new(Arc::new(meridian_operator::ClosureRowProcessor(
            |_page: &Page, _pos: usize| true,
        )));

        let mut driver = Driver::new(vec![Operator::Values(values), Operator::Filter(pass)]);
        let time = MockProvider::new(Time::ZERO);
        // Advance time by a full quantum on the very first `now()` sample
        // taken *inside* the loop after the deadline check by using a
        // quantum of zero: the first boundary step always trips it.
        match driver.process(Duration::from_nanos(0), &time) {
            DriverState::MadeProgress | DriverState::Finished => {}
            other => panic!("expected MadeProgress or Finished, got {other:?}"),
        }
    }
}
