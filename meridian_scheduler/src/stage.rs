//! [`StageScheduler`]: places Tasks on nodes, feeds Splits to source Tasks,
//! and resolves blockers for a single Stage, one round at a time (§4.9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meridian_rpc::ids::{AttemptId, NodeId, QueryId, StageId, TaskId, TaskInstanceId};
use meridian_rpc::traits::{BlockedFuture, SplitSource};
use observability_deps::tracing::{debug, info};
use parking_lot::Mutex;

use crate::node_selector::NodeSelector;

/// Why a [`ScheduleResult`] reported `blocked = Some(_)` (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    /// A scale-writer stage is between scale-up checks; re-poll once more
    /// write volume/memory pressure has accumulated.
    WriterScaling,
    /// Every source Task's split queue is already at its buffering limit;
    /// re-poll once a worker drains some.
    SplitQueuesFull,
    /// The stage is a source stage and its `SplitSource` has no splits
    /// ready right now, but hasn't signalled end-of-stream either.
    WaitingForSource,
}

/// The result of one [`StageScheduler::schedule_round`] call (§4.9).
#[derive(Debug)]
pub struct ScheduleResult {
    /// Whether this stage's scheduling is complete: every Task it will
    /// ever need has been created and (for source stages) every split has
    /// been assigned. Does **not** mean the stage's Tasks have finished
    /// *executing* — that is tracked by Task status polling, not this
    /// result.
    pub finished: bool,
    /// Tasks created during this round (§3's Task identity).
    pub new_tasks: Vec<TaskInstanceId>,
    /// Present iff this round made no progress and the caller should wait
    /// before calling again; an unblocked, non-finished result must
    /// eventually be called again directly (§4.9).
    pub blocked: Option<BlockedFuture>,
    /// Why `blocked` is set, when it is.
    pub blocked_reason: Option<BlockedReason>,
    /// Splits assigned to a Task during this round.
    pub splits_scheduled: u32,
}

#[derive(Debug, Clone, Copy)]
enum StageKind {
    /// Drives splits from a connector `SplitSource` into source Tasks,
    /// creating one Task per distinct node a split lands on.
    Source,
    /// A fixed fan-out of Tasks, one per candidate node, created in a
    /// single round (gathered stages use `task_count = 1`).
    Fixed { task_count: usize },
    /// Starts with one writer Task per node and grows per §4.6's rule,
    /// reapplied at Task (not local-exchange-sink) granularity.
    ScaleWriter {
        max_fan_out: usize,
        writer_min_size_bytes: u64,
        buffer_budget_bytes: i64,
    },
}

struct ScaleWriterState {
    active_count: AtomicUsize,
    physical_written_bytes: AtomicU32,
    last_scale_up_physical_written_bytes: AtomicU32,
    buffer_usage_bytes: AtomicU32,
}

/// Places Tasks for a single Stage and, for source stages, assigns Splits
/// to them, one [`Self::schedule_round`] call at a time (§4.9). A
/// coordinator drives one `StageScheduler` per Stage in its DAG; rounds are
/// idempotent to re-entry once `finished` is reported.
pub struct StageScheduler {
    query_id: QueryId,
    stage_id: StageId,
    kind: StageKind,
    node_selector: Arc<dyn NodeSelector>,
    split_source: Option<Arc<dyn SplitSource>>,
    split_batch_size: usize,
    state: Mutex<State>,
    scale_writer: Option<ScaleWriterState>,
    next_task_id: AtomicU32,
}

struct State {
    /// Task assigned to each node this stage has placed one on.
    tasks_by_node: HashMap<NodeId, TaskInstanceId>,
    node_loads: HashMap<NodeId, usize>,
    split_source_exhausted: bool,
    fixed_tasks_created: bool,
}

impl std::fmt::Debug for StageScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageScheduler")
            .field("query_id", &self.query_id)
            .field("stage_id", &self.stage_id)
            .finish_non_exhaustive()
    }
}

impl StageScheduler {
    /// Construct a source-stage scheduler: pulls splits from `split_source`
    /// in batches of `split_batch_size` and places one Task per node a
    /// split is routed to.
    pub fn source(
        query_id: QueryId,
        stage_id: StageId,
        node_selector: Arc<dyn NodeSelector>,
        split_source: Arc<dyn SplitSource>,
        split_batch_size: usize,
    ) -> Self {
        Self {
            query_id,
            stage_id,
            kind: StageKind::Source,
            node_selector,
            split_source: Some(split_source),
            split_batch_size,
            state: Mutex::new(State {
                tasks_by_node: HashMap::new(),
                node_loads: HashMap::new(),
                split_source_exhausted: false,
                fixed_tasks_created: false,
            }),
            scale_writer: None,
            next_task_id: AtomicU32::new(0),
        }
    }

    /// Construct a fixed-fan-out stage scheduler: creates `task_count`
    /// Tasks across the node selector's candidate nodes in a single round
    /// (a gathered/output stage uses `task_count = 1`).
    pub fn fixed(
        query_id: QueryId,
        stage_id: StageId,
        node_selector: Arc<dyn NodeSelector>,
        task_count: usize,
    ) -> Self {
        assert!(task_count >= 1, "a fixed stage needs at least one task");
        Self {
            query_id,
            stage_id,
            kind: StageKind::Fixed { task_count },
            node_selector,
            split_source: None,
            split_batch_size: 0,
            state: Mutex::new(State {
                tasks_by_node: HashMap::new(),
                node_loads: HashMap::new(),
                split_source_exhausted: true,
                fixed_tasks_created: false,
            }),
            scale_writer: None,
            next_task_id: AtomicU32::new(0),
        }
    }

    /// Construct a scale-writer stage scheduler: starts with one writer
    /// Task per node, growing up to `max_fan_out` Tasks as reported write
    /// volume and buffer utilization demand it (§4.6, reapplied at Task
    /// granularity).
    pub fn scale_writer(
        query_id: QueryId,
        stage_id: StageId,
        node_selector: Arc<dyn NodeSelector>,
        max_fan_out: usize,
        writer_min_size_bytes: u64,
        buffer_budget_bytes: i64,
    ) -> Self {
        assert!(max_fan_out >= 1, "scale-writer stage needs at least one writer slot");
        Self {
            query_id,
            stage_id,
            kind: StageKind::ScaleWriter {
                max_fan_out,
                writer_min_size_bytes,
                buffer_budget_bytes,
            },
            node_selector,
            split_source: None,
            split_batch_size: 0,
            state: Mutex::new(State {
                tasks_by_node: HashMap::new(),
                node_loads: HashMap::new(),
                split_source_exhausted: true,
                fixed_tasks_created: false,
            }),
            scale_writer: Some(ScaleWriterState {
                active_count: AtomicUsize::new(0),
                physical_written_bytes: AtomicU32::new(0),
                last_scale_up_physical_written_bytes: AtomicU32::new(0),
                buffer_usage_bytes: AtomicU32::new(0),
            }),
            next_task_id: AtomicU32::new(0),
        }
    }

    /// Run one scheduling round (§4.9).
    pub async fn schedule_round(&self) -> ScheduleResult {
        match self.kind {
            StageKind::Source => self.schedule_source_round().await,
            StageKind::Fixed { task_count } => self.schedule_fixed_round(task_count),
            StageKind::ScaleWriter { max_fan_out, writer_min_size_bytes, .. } => {
                self.schedule_scale_writer_round(max_fan_out, writer_min_size_bytes)
            }
        }
    }

    async fn schedule_source_round(&self) -> ScheduleResult {
        let source = self
            .split_source
            .as_ref()
            .expect("source stages are always constructed with a split source")
            .clone();

        let batch = match source.next(self.split_batch_size).await {
            Ok(batch) => batch,
            Err(_) => {
                // A transport/connector failure from the split source is
                // surfaced to the coordinator's failure path, not modeled
                // here (§7) — treat as "nothing ready this round".
                return ScheduleResult {
                    finished: false,
                    new_tasks: Vec::new(),
                    blocked: Some(Box::pin(tokio::time::sleep(Duration::from_millis(50)))),
                    blocked_reason: Some(BlockedReason::WaitingForSource),
                    splits_scheduled: 0,
                };
            }
        };

        let mut new_tasks = Vec::new();
        let mut splits_scheduled = 0u32;
        for split in &batch.splits {
            let node = self.pick_node(split.preferred_nodes());
            let is_new = {
                let state = self.state.lock();
                !state.tasks_by_node.contains_key(&node)
            };
            if is_new {
                let task_id = self.place_task_on(node);
                new_tasks.push(task_id);
            }
            *self.state.lock().node_loads.entry(node).or_insert(0) += 1;
            splits_scheduled += 1;
        }

        if batch.no_more_splits {
            self.state.lock().split_source_exhausted = true;
            debug!(query_id = %self.query_id, stage_id = %self.stage_id, "source stage split source exhausted");
        }

        let finished = self.state.lock().split_source_exhausted;
        if finished {
            return ScheduleResult {
                finished: true,
                new_tasks,
                blocked: None,
                blocked_reason: None,
                splits_scheduled,
            };
        }

        if splits_scheduled == 0 {
            return ScheduleResult {
                finished: false,
                new_tasks,
                blocked: Some(Box::pin(tokio::time::sleep(Duration::from_millis(50)))),
                blocked_reason: Some(BlockedReason::WaitingForSource),
                splits_scheduled,
            };
        }

        ScheduleResult {
            finished: false,
            new_tasks,
            blocked: None,
            blocked_reason: None,
            splits_scheduled,
        }
    }

    fn schedule_fixed_round(&self, task_count: usize) -> ScheduleResult {
        let mut state = self.state.lock();
        if state.fixed_tasks_created {
            return ScheduleResult {
                finished: true,
                new_tasks: Vec::new(),
                blocked: None,
                blocked_reason: None,
                splits_scheduled: 0,
            };
        }
        drop(state);

        let nodes = self.node_selector.all_nodes();
        let mut new_tasks = Vec::with_capacity(task_count);
        for i in 0..task_count {
            let node = nodes[i % nodes.len()];
            new_tasks.push(self.place_task_on(node));
        }

        state = self.state.lock();
        state.fixed_tasks_created = true;
        drop(state);

        info!(
            query_id = %self.query_id, stage_id = %self.stage_id, tasks = task_count,
            "fixed stage placed its full task fan-out"
        );
        ScheduleResult {
            finished: true,
            new_tasks,
            blocked: None,
            blocked_reason: None,
            splits_scheduled: 0,
        }
    }

    fn schedule_scale_writer_round(&self, max_fan_out: usize, writer_min_size_bytes: u64) -> ScheduleResult {
        let scaler = self
            .scale_writer
            .as_ref()
            .expect("scale-writer stages are always constructed with scaler state");

        let mut new_tasks = Vec::new();
        if !self.state.lock().fixed_tasks_created {
            let nodes = self.node_selector.all_nodes();
            for &node in &nodes {
                new_tasks.push(self.place_task_on(node));
            }
            scaler.active_count.store(nodes.len().min(max_fan_out), Ordering::Release);
            self.state.lock().fixed_tasks_created = true;
            return ScheduleResult {
                finished: false,
                new_tasks,
                blocked: None,
                blocked_reason: None,
                splits_scheduled: 0,
            };
        }

        let active = scaler.active_count.load(Ordering::Acquire);
        if active >= max_fan_out {
            return ScheduleResult {
                finished: true,
                new_tasks: Vec::new(),
                blocked: None,
                blocked_reason: None,
                splits_scheduled: 0,
            };
        }

        let utilization_ok =
            scaler.buffer_usage_bytes.load(Ordering::Acquire) as i64 * 2 >= self.scale_writer_budget();
        let written = scaler.physical_written_bytes.load(Ordering::Acquire) as u64;
        let last = scaler.last_scale_up_physical_written_bytes.load(Ordering::Acquire) as u64;
        let threshold = active as u64 * writer_min_size_bytes;

        if utilization_ok && written.saturating_sub(last) >= threshold {
            let node = self.pick_node(&[]);
            let task_id = self.place_task_on(node);
            scaler.active_count.store(active + 1, Ordering::Release);
            debug!(
                query_id = %self.query_id, stage_id = %self.stage_id, active = active + 1,
                "scale-writer stage grew its task fan-out"
            );
            return ScheduleResult {
                finished: false,
                new_tasks: vec![task_id],
                blocked: None,
                blocked_reason: None,
                splits_scheduled: 0,
            };
        }

        ScheduleResult {
            finished: false,
            new_tasks: Vec::new(),
            blocked: Some(Box::pin(tokio::time::sleep(Duration::from_millis(50)))),
            blocked_reason: Some(BlockedReason::WriterScaling),
            splits_scheduled: 0,
        }
    }

    fn scale_writer_budget(&self) -> i64 {
        match self.kind {
            StageKind::ScaleWriter { buffer_budget_bytes, .. } => buffer_budget_bytes,
            _ => unreachable!("scale_writer_budget only called for ScaleWriter stages"),
        }
    }

    /// Report buffered bytes and cumulative physical bytes written for a
    /// scale-writer stage's Tasks, driving the next
    /// [`Self::schedule_round`]'s growth check (§4.6). A no-op for
    /// non-scale-writer stages.
    pub fn report_scale_writer_progress(&self, buffer_usage_bytes: u64, physical_written_bytes_delta: u64) {
        if let Some(scaler) = &self.scale_writer {
            scaler.buffer_usage_bytes.store(buffer_usage_bytes as u32, Ordering::Release);
            scaler
                .physical_written_bytes
                .fetch_add(physical_written_bytes_delta as u32, Ordering::AcqRel);
        }
    }

    /// Current active writer Task count for a scale-writer stage (§8
    /// property 6). `0` for non-scale-writer stages.
    pub fn active_writer_count(&self) -> usize {
        self.scale_writer
            .as_ref()
            .map(|s| s.active_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Tie-break node selection (§4.9): prefer nodes with the most
    /// affinity (colocation with the split, if any `preferred` nodes are
    /// given), then least loaded, then lexicographic id.
    fn pick_node(&self, preferred: &[NodeId]) -> NodeId {
        let all = self.node_selector.all_nodes();
        assert!(!all.is_empty(), "node selector returned no candidate nodes");

        let candidates: Vec<NodeId> = if preferred.is_empty() {
            all
        } else {
            let matched: Vec<NodeId> = all.iter().copied().filter(|n| preferred.contains(n)).collect();
            if matched.is_empty() { all } else { matched }
        };

        let state = self.state.lock();
        candidates
            .into_iter()
            .min_by(|a, b| {
                let load_a = state.node_loads.get(a).copied().unwrap_or(0);
                let load_b = state.node_loads.get(b).copied().unwrap_or(0);
                load_a.cmp(&load_b).then_with(|| a.as_u64().cmp(&b.as_u64()))
            })
            .expect("candidates is non-empty")
    }

    fn place_task_on(&self, node: NodeId) -> TaskInstanceId {
        let task_id = TaskInstanceId {
            query_id: self.query_id,
            stage_id: self.stage_id,
            task_id: TaskId::new(self.next_task_id.fetch_add(1, Ordering::AcqRel) as u64),
            attempt_id: AttemptId::new(0),
        };
        self.state.lock().tasks_by_node.insert(node, task_id);
        debug!(query_id = %self.query_id, stage_id = %self.stage_id, %node, task = %task_id, "task placed");
        task_id
    }

    /// The Task this stage placed on `node`, if any.
    pub fn task_on_node(&self, node: NodeId) -> Option<TaskInstanceId> {
        self.state.lock().tasks_by_node.get(&node).copied()
    }

    /// Every Task this stage has placed so far.
    pub fn placed_tasks(&self) -> Vec<TaskInstanceId> {
        self.state.lock().tasks_by_node.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meridian_rpc::ids::SplitId;
    use meridian_rpc::split::{Split, SplitBatch};
    use meridian_rpc::traits::SplitSourceError;
    use parking_lot::Mutex as PMutex;

    use crate::node_selector::StaticNodeSelector;

    #[derive(Debug)]
    struct QueueSplitSource {
        batches: PMutex<Vec<SplitBatch>>,
    }

    #[async_trait]
    impl SplitSource for QueueSplitSource {
        async fn next(&self, _batch_size: usize) -> Result<SplitBatch, SplitSourceError> {
            let mut batches = self.batches.lock();
            if batches.is_empty() {
                return Ok(SplitBatch { splits: Vec::new(), no_more_splits: true });
            }
            Ok(batches.remove(0))
        }
    }

    fn nodes(n: u64) -> Arc<StaticNodeSelector> {
        Arc::new(StaticNodeSelector::new((1..=n).map(NodeId::new).collect()))
    }

    fn split(id: u64, preferred: Vec<NodeId>) -> Split {
        Split::new(SplitId::new(id), vec![], preferred)
    }

    #[tokio::test]
    async fn scenario_e_source_stage_schedules_ten_splits_over_two_nodes() {
        let splits: Vec<Split> = (0..10).map(|i| split(i, vec![])).collect();
        let source = Arc::new(QueueSplitSource {
            batches: PMutex::new(vec![
                SplitBatch { splits: splits[..5].to_vec(), no_more_splits: false },
                SplitBatch { splits: splits[5..].to_vec(), no_more_splits: true },
            ]),
        });

        let scheduler = StageScheduler::source(QueryId::new(1), StageId::new(0), nodes(2), source, 5);

        let r1 = scheduler.schedule_round().await;
        assert!(!r1.finished);
        assert_eq!(r1.splits_scheduled, 5);

        let r2 = scheduler.schedule_round().await;
        assert!(r2.finished);
        assert_eq!(r2.splits_scheduled, 5);

        assert_eq!(scheduler.placed_tasks().len(), 2, "splits should fan out across both nodes");
    }

    #[tokio::test]
    async fn fixed_stage_places_its_full_fan_out_in_one_round_then_is_idempotent() {
        let scheduler = StageScheduler::fixed(QueryId::new(1), StageId::new(1), nodes(4), 4);
        let r1 = scheduler.schedule_round().await;
        assert!(r1.finished);
        assert_eq!(r1.new_tasks.len(), 4);

        let r2 = scheduler.schedule_round().await;
        assert!(r2.finished);
        assert!(r2.new_tasks.is_empty());
    }

    #[tokio::test]
    async fn gathered_stage_is_a_fixed_stage_with_one_task() {
        let scheduler = StageScheduler::fixed(QueryId::new(1), StageId::new(2), nodes(3), 1);
        let r = scheduler.schedule_round().await;
        assert_eq!(r.new_tasks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_writer_stage_starts_one_per_node_then_grows_per_rule() {
        let scheduler = StageScheduler::scale_writer(QueryId::new(1), StageId::new(3), nodes(1), 4, 10, 100);

        let r0 = scheduler.schedule_round().await;
        assert_eq!(r0.new_tasks.len(), 1);
        assert_eq!(scheduler.active_writer_count(), 1);

        // Scenario C's thresholds: buffer budget 100, writerMinSize 10.
        scheduler.report_scale_writer_progress(60, 12);
        let r1 = scheduler.schedule_round().await;
        assert_eq!(r1.new_tasks.len(), 1);
        assert_eq!(scheduler.active_writer_count(), 2);

        scheduler.report_scale_writer_progress(60, 12);
        let r2 = scheduler.schedule_round().await;
        assert_eq!(r2.new_tasks.len(), 1);
        assert_eq!(scheduler.active_writer_count(), 3);

        // Never exceeds the configured fan-out.
        for _ in 0..10 {
            scheduler.report_scale_writer_progress(60, 12);
            let r = scheduler.schedule_round().await;
            if r.finished {
                break;
            }
        }
        assert!(scheduler.active_writer_count() <= 4);
    }

    #[tokio::test]
    async fn tie_break_prefers_affinity_then_least_loaded_then_lexicographic_id() {
        let source = Arc::new(QueueSplitSource {
            batches: PMutex::new(vec![SplitBatch {
                splits: vec![split(0, vec![NodeId::new(2)]), split(1, vec![]), split(2, vec![])],
                no_more_splits: true,
            }]),
        });
        let scheduler = StageScheduler::source(QueryId::new(1), StageId::new(0), nodes(2), source, 10);
        scheduler.schedule_round().await;

        // The affinity-pinned split must land on node 2; the two
        // unpinned splits balance across both nodes rather than piling
        // onto node 1 lexicographically.
        assert_eq!(scheduler.task_on_node(NodeId::new(2)).is_some(), true);
        assert_eq!(scheduler.placed_tasks().len(), 2);
    }
}
