//! Concrete operator bodies for each [`crate::Operator`] variant (§4.4).
//!
//! Exchange/output variants are closure-based adapters rather than direct
//! dependents of `meridian_exchange_local`'s handle types: the four local
//! exchange kinds have write/read signatures that differ just enough
//! (`Partitioned` takes `&Page`, `ScaleWriter` takes an extra physical-bytes
//! count) that giving this crate a hard dependency on all four would mean
//! an operator-side match on exchange kind duplicating the one `Driver`
//! wiring already has to do. The wiring code (in `meridian_driver`) closes
//! over whichever concrete handle a pipeline needs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use meridian_page::block::{Block, FixedWidthBlock};
use meridian_page::cipher::SpillCipher;
use meridian_page::codec;
use meridian_page::page::Page;
use meridian_rpc::traits::{not_blocked, BlockedFuture, ConnectorPageSource};

use crate::operator::OperatorLogic;
use crate::pageutil::concat_pages;
use crate::processor::{CompiledPageProcessor, CompiledRowProcessor};

fn sort_indices(page: &Page, key_channel: usize, ascending: bool) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..page.position_count()).collect();
    idx.sort_by_key(|&i| page.channel(key_channel).get_long(i).unwrap_or(i64::MAX));
    if !ascending {
        idx.reverse();
    }
    idx
}

fn gather_page(page: &Page, positions: &[usize]) -> Page {
    let blocks = (0..page.channel_count())
        .map(|c| page.channel(c).copy_positions(positions).expect("positions already bounds-checked"))
        .collect();
    Page::new(blocks)
}

/// Pulls pages from a connector split until exhausted (§4.4's Scan).
#[derive(Debug)]
pub struct ScanOperator {
    source: Box<dyn ConnectorPageSource>,
    upstream_finished: bool,
}

impl ScanOperator {
    /// Construct a scan reading from `source`.
    pub fn new(source: Box<dyn ConnectorPageSource>) -> Self {
        Self {
            source,
            upstream_finished: false,
        }
    }
}

impl OperatorLogic for ScanOperator {
    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) {
        unreachable!("ScanOperator is a source and never needs input");
    }

    fn get_output(&mut self) -> Option<Page> {
        match self.source.get_next_page() {
            Ok(page) => page,
            Err(_) => None,
        }
    }

    fn finish(&mut self) {
        self.upstream_finished = true;
    }

    fn is_finished(&self) -> bool {
        self.upstream_finished || self.source.is_finished()
    }

    fn is_blocked(&self) -> BlockedFuture {
        self.source.is_blocked()
    }
}

/// Replays a fixed, pre-built sequence of pages (the planner's literal
/// `VALUES` clause, or a test fixture).
#[derive(Debug)]
pub struct ValuesOperator {
    pages: VecDeque<Page>,
}

impl ValuesOperator {
    /// Construct from an already-built sequence of pages to replay in order.
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            pages: pages.into(),
        }
    }
}

impl OperatorLogic for ValuesOperator {
    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) {
        unreachable!("ValuesOperator is a source and never needs input");
    }

    fn get_output(&mut self) -> Option<Page> {
        self.pages.pop_front()
    }

    fn finish(&mut self) {}

    fn is_finished(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Drops rows for which a [`CompiledRowProcessor`] returns `false` (§4.4).
pub struct FilterOperator {
    predicate: Arc<dyn CompiledRowProcessor>,
    pending: VecDeque<Page>,
    upstream_finished: bool,
}

impl std::fmt::Debug for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterOperator").finish_non_exhaustive()
    }
}

impl FilterOperator {
    /// Construct a filter applying `predicate` to each input page.
    pub fn new(predicate: Arc<dyn CompiledRowProcessor>) -> Self {
        Self {
            predicate,
            pending: VecDeque::new(),
            upstream_finished: false,
        }
    }
}

impl OperatorLogic for FilterOperator {
    fn needs_input(&self) -> bool {
        self.pending.is_empty() && !self.upstream_finished
    }

    fn add_input(&mut self, page: Page) {
        let mut surviving = Vec::with_capacity(page.position_count());
        for i in 0..page.position_count() {
            if self.predicate.evaluate(&page, i).unwrap_or(false) {
                surviving.push(i);
            }
        }
        self.pending.push_back(gather_page(&page, &surviving));
    }

    fn get_output(&mut self) -> Option<Page> {
        self.pending.pop_front()
    }

    fn finish(&mut self) {
        self.upstream_finished = true;
    }

    fn is_finished(&self) -> bool {
        self.upstream_finished && self.pending.is_empty()
    }
}

/// Transforms each input page through a [`CompiledPageProcessor`] (§4.4).
pub struct ProjectOperator {
    processor: Arc<dyn CompiledPageProcessor>,
    pending: VecDeque<Page>,
    upstream_finished: bool,
}

impl std::fmt::Debug for ProjectOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectOperator").finish_non_exhaustive()
    }
}

impl ProjectOperator {
    /// Construct a projection applying `processor` to each input page.
    pub fn new(processor: Arc<dyn CompiledPageProcessor>) -> Self {
        Self {
            processor,
            pending: VecDeque::new(),
            upstream_finished: false,
        }
    }
}

impl OperatorLogic for ProjectOperator {
    fn needs_input(&self) -> bool {
        self.pending.is_empty() && !self.upstream_finished
    }

    fn add_input(&mut self, page: Page) {
        if let Ok(out) = self.processor.process(&page) {
            self.pending.push_back(out);
        }
    }

    fn get_output(&mut self) -> Option<Page> {
        self.pending.pop_front()
    }

    fn finish(&mut self) {
        self.upstream_finished = true;
    }

    fn is_finished(&self) -> bool {
        self.upstream_finished && self.pending.is_empty()
    }
}

/// Caps total output rows at a fixed count (§4.4).
#[derive(Debug)]
pub struct LimitOperator {
    remaining: usize,
    pending: VecDeque<Page>,
    limit_reached: bool,
    upstream_finished: bool,
}

impl LimitOperator {
    /// Construct a limit passing through at most `limit` rows total.
    pub fn new(limit: usize) -> Self {
        Self {
            remaining: limit,
            pending: VecDeque::new(),
            limit_reached: limit == 0,
            upstream_finished: false,
        }
    }
}

impl OperatorLogic for LimitOperator {
    fn needs_input(&self) -> bool {
        self.pending.is_empty() && !self.limit_reached && !self.upstream_finished
    }

    fn add_input(&mut self, page: Page) {
        let take = self.remaining.min(page.position_count());
        if take > 0 {
            self.pending.push_back(page.get_region(0, take));
        }
        self.remaining -= take;
        if self.remaining == 0 {
            self.limit_reached = true;
        }
    }

    fn get_output(&mut self) -> Option<Page> {
        self.pending.pop_front()
    }

    fn finish(&mut self) {
        self.upstream_finished = true;
    }

    fn is_finished(&self) -> bool {
        self.pending.is_empty() && (self.limit_reached || self.upstream_finished)
    }
}

/// Buffers the entire upstream and emits it fully ordered by one channel
/// (§4.4). A blocking operator: produces no output until [`Self::finish`].
#[derive(Debug)]
pub struct SortOperator {
    key_channel: usize,
    ascending: bool,
    buffered: Vec<Page>,
    output: Option<Page>,
    done: bool,
}

impl SortOperator {
    /// Construct a sort keyed on `key_channel`, `ascending` or descending.
    pub fn new(key_channel: usize, ascending: bool) -> Self {
        Self {
            key_channel,
            ascending,
            buffered: Vec::new(),
            output: None,
            done: false,
        }
    }
}

impl OperatorLogic for SortOperator {
    fn needs_input(&self) -> bool {
        !self.done
    }

    fn add_input(&mut self, page: Page) {
        self.buffered.push(page);
    }

    fn get_output(&mut self) -> Option<Page> {
        self.output.take()
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        let combined = concat_pages(&self.buffered);
        self.buffered.clear();
        let order = sort_indices(&combined, self.key_channel, self.ascending);
        self.output = Some(gather_page(&combined, &order));
        self.done = true;
    }

    fn is_finished(&self) -> bool {
        self.done && self.output.is_none()
    }
}

/// Like [`SortOperator`] but retains only the top `limit` rows (§4.4).
#[derive(Debug)]
pub struct TopNOperator {
    key_channel: usize,
    ascending: bool,
    limit: usize,
    buffered: Vec<Page>,
    output: Option<Page>,
    done: bool,
}

impl TopNOperator {
    /// Construct a top-`limit` keyed on `key_channel`.
    pub fn new(key_channel: usize, ascending: bool, limit: usize) -> Self {
        Self {
            key_channel,
            ascending,
            limit,
            buffered: Vec::new(),
            output: None,
            done: false,
        }
    }
}

impl OperatorLogic for TopNOperator {
    fn needs_input(&self) -> bool {
        !self.done
    }

    fn add_input(&mut self, page: Page) {
        self.buffered.push(page);
    }

    fn get_output(&mut self) -> Option<Page> {
        self.output.take()
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        let combined = concat_pages(&self.buffered);
        self.buffered.clear();
        let mut order = sort_indices(&combined, self.key_channel, self.ascending);
        order.truncate(self.limit);
        self.output = Some(gather_page(&combined, &order));
        self.done = true;
    }

    fn is_finished(&self) -> bool {
        self.done && self.output.is_none()
    }
}

/// Streaming distinct marker: appends a boolean channel true for the first
/// occurrence of each distinct key value seen so far (§4.4).
#[derive(Debug)]
pub struct MarkDistinctOperator {
    key_channel: usize,
    seen: HashSet<i64>,
    pending: VecDeque<Page>,
    upstream_finished: bool,
}

impl MarkDistinctOperator {
    /// Construct a mark-distinct operator keyed on `key_channel`.
    pub fn new(key_channel: usize) -> Self {
        Self {
            key_channel,
            seen: HashSet::new(),
            pending: VecDeque::new(),
            upstream_finished: false,
        }
    }
}

impl OperatorLogic for MarkDistinctOperator {
    fn needs_input(&self) -> bool {
        self.pending.is_empty() && !self.upstream_finished
    }

    fn add_input(&mut self, page: Page) {
        let marks: Vec<i8> = (0..page.position_count())
            .map(|i| {
                let key = page.channel(self.key_channel).get_long(i).unwrap_or_default();
                i8::from(self.seen.insert(key))
            })
            .collect();
        let mark_block = Block::ByteArray(FixedWidthBlock::new(marks, None).expect("marks carry no nulls"));
        let mut blocks: Vec<Block> = (0..page.channel_count()).map(|c| page.channel(c).clone()).collect();
        blocks.push(mark_block);
        self.pending.push_back(Page::new(blocks));
    }

    fn get_output(&mut self) -> Option<Page> {
        self.pending.pop_front()
    }

    fn finish(&mut self) {
        self.upstream_finished = true;
    }

    fn is_finished(&self) -> bool {
        self.upstream_finished && self.pending.is_empty()
    }
}

/// Hash-grouped `SUM`/`COUNT` over one value channel (§4.4). A blocking
/// operator, same shape as [`SortOperator`].
#[derive(Debug)]
pub struct AggregationOperator {
    key_channel: usize,
    value_channel: usize,
    buffered: Vec<Page>,
    output: Option<Page>,
    done: bool,
}

impl AggregationOperator {
    /// Construct an aggregation grouping on `key_channel`, summing
    /// `value_channel`.
    pub fn new(key_channel: usize, value_channel: usize) -> Self {
        Self {
            key_channel,
            value_channel,
            buffered: Vec::new(),
            output: None,
            done: false,
        }
    }
}

impl OperatorLogic for AggregationOperator {
    fn needs_input(&self) -> bool {
        !self.done
    }

    fn add_input(&mut self, page: Page) {
        self.buffered.push(page);
    }

    fn get_output(&mut self) -> Option<Page> {
        self.output.take()
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        let combined = concat_pages(&self.buffered);
        self.buffered.clear();

        // Preserve first-seen order so the result is deterministic for tests.
        let mut order = Vec::new();
        let mut groups: HashMap<i64, (i64, i64)> = HashMap::new();
        for i in 0..combined.position_count() {
            let key = combined.channel(self.key_channel).get_long(i).unwrap_or_default();
            let value = combined.channel(self.value_channel).get_long(i).unwrap_or(0);
            let entry = groups.entry(key).or_insert_with(|| {
                order.push(key);
                (0, 0)
            });
            entry.0 += value;
            entry.1 += 1;
        }

        let keys: Vec<i64> = order.clone();
        let sums: Vec<i64> = order.iter().map(|k| groups[k].0).collect();
        let counts: Vec<i64> = order.iter().map(|k| groups[k].1).collect();
        self.output = Some(Page::new(vec![
            Block::LongArray(FixedWidthBlock::new(keys, None).expect("keys carry no nulls")),
            Block::LongArray(FixedWidthBlock::new(sums, None).expect("sums carry no nulls")),
            Block::LongArray(FixedWidthBlock::new(counts, None).expect("counts carry no nulls")),
        ]));
        self.done = true;
    }

    fn is_finished(&self) -> bool {
        self.done && self.output.is_none()
    }
}

/// Running-sum-over-partition window function, in arrival order (§4.4).
#[derive(Debug)]
pub struct WindowOperator {
    partition_channel: usize,
    value_channel: usize,
    buffered: Vec<Page>,
    output: Option<Page>,
    done: bool,
}

impl WindowOperator {
    /// Construct a running-sum window partitioned on `partition_channel`.
    pub fn new(partition_channel: usize, value_channel: usize) -> Self {
        Self {
            partition_channel,
            value_channel,
            buffered: Vec::new(),
            output: None,
            done: false,
        }
    }
}

impl OperatorLogic for WindowOperator {
    fn needs_input(&self) -> bool {
        !self.done
    }

    fn add_input(&mut self, page: Page) {
        self.buffered.push(page);
    }

    fn get_output(&mut self) -> Option<Page> {
        self.output.take()
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        let combined = concat_pages(&self.buffered);
        self.buffered.clear();

        let mut running: HashMap<i64, i64> = HashMap::new();
        let result: Vec<i64> = (0..combined.position_count())
            .map(|i| {
                let key = combined.channel(self.partition_channel).get_long(i).unwrap_or_default();
                let value = combined.channel(self.value_channel).get_long(i).unwrap_or(0);
                let entry = running.entry(key).or_insert(0);
                *entry += value;
                *entry
            })
            .collect();

        let mut blocks: Vec<Block> = (0..combined.channel_count())
            .map(|c| combined.channel(c).clone())
            .collect();
        blocks.push(Block::LongArray(
            FixedWidthBlock::new(result, None).expect("running sums carry no nulls"),
        ));
        self.output = Some(Page::new(blocks));
        self.done = true;
    }

    fn is_finished(&self) -> bool {
        self.done && self.output.is_none()
    }
}

/// An in-memory equi-join's build side: the materialized hash index a
/// [`HashProbeOperator`] probes against (§4.4).
#[derive(Debug)]
pub struct HashTable {
    page: Page,
    index: HashMap<i64, Vec<usize>>,
}

/// Buffers its entire input and builds a [`HashTable`] keyed on one integer
/// channel, on [`Self::finish`] (§4.4's HashBuild).
#[derive(Debug)]
pub struct HashBuildOperator {
    key_channel: usize,
    buffered: Vec<Page>,
    table: Option<Arc<HashTable>>,
}

impl HashBuildOperator {
    /// Construct a hash build keyed on `key_channel`.
    pub fn new(key_channel: usize) -> Self {
        Self {
            key_channel,
            buffered: Vec::new(),
            table: None,
        }
    }

    /// The finished hash table. Panics if called before [`OperatorLogic::finish`]
    /// — an internal wiring error (the probe side started before the build
    /// side finished), not a query-time condition.
    pub fn hash_table(&self) -> Arc<HashTable> {
        self.table
            .clone()
            .expect("HashBuildOperator::hash_table called before finish")
    }
}

impl OperatorLogic for HashBuildOperator {
    fn needs_input(&self) -> bool {
        self.table.is_none()
    }

    fn add_input(&mut self, page: Page) {
        self.buffered.push(page);
    }

    fn get_output(&mut self) -> Option<Page> {
        None
    }

    fn finish(&mut self) {
        if self.table.is_some() {
            return;
        }
        let combined = concat_pages(&self.buffered);
        self.buffered.clear();
        let mut index: HashMap<i64, Vec<usize>> = HashMap::new();
        for i in 0..combined.position_count() {
            if combined.channel(self.key_channel).is_null(i) {
                continue;
            }
            let key = combined.channel(self.key_channel).get_long(i).unwrap_or_default();
            index.entry(key).or_default().push(i);
        }
        self.table = Some(Arc::new(HashTable { page: combined, index }));
    }

    fn is_finished(&self) -> bool {
        self.table.is_some()
    }
}

/// Probes each input row against a [`HashBuildOperator`]'s finished
/// [`HashTable`], emitting one joined row per match (§4.4's HashProbe).
#[derive(Debug)]
pub struct HashProbeOperator {
    key_channel: usize,
    build: Arc<HashTable>,
    pending: VecDeque<Page>,
    upstream_finished: bool,
}

impl HashProbeOperator {
    /// Construct a probe keyed on `key_channel` against `build`.
    pub fn new(key_channel: usize, build: Arc<HashTable>) -> Self {
        Self {
            key_channel,
            build,
            pending: VecDeque::new(),
            upstream_finished: false,
        }
    }
}

impl OperatorLogic for HashProbeOperator {
    fn needs_input(&self) -> bool {
        self.pending.is_empty() && !self.upstream_finished
    }

    fn add_input(&mut self, page: Page) {
        let mut probe_positions = Vec::new();
        let mut build_positions = Vec::new();
        for i in 0..page.position_count() {
            if page.channel(self.key_channel).is_null(i) {
                continue;
            }
            let key = page.channel(self.key_channel).get_long(i).unwrap_or_default();
            if let Some(matches) = self.build.index.get(&key) {
                for &bp in matches {
                    probe_positions.push(i);
                    build_positions.push(bp);
                }
            }
        }
        if probe_positions.is_empty() {
            return;
        }
        let mut blocks: Vec<Block> = (0..page.channel_count())
            .map(|c| page.channel(c).copy_positions(&probe_positions).expect("bounds-checked"))
            .collect();
        for c in 0..self.build.page.channel_count() {
            blocks.push(
                self.build
                    .page
                    .channel(c)
                    .copy_positions(&build_positions)
                    .expect("bounds-checked"),
            );
        }
        self.pending.push_back(Page::new(blocks));
    }

    fn get_output(&mut self) -> Option<Page> {
        self.pending.pop_front()
    }

    fn finish(&mut self) {
        self.upstream_finished = true;
    }

    fn is_finished(&self) -> bool {
        self.upstream_finished && self.pending.is_empty()
    }
}

/// Adapts a Driver-local pipeline's outbound side to a local exchange sink
/// (§4.6) through caller-supplied closures, avoiding a dependency on any one
/// of `meridian_exchange_local`'s four handle shapes.
pub struct ExchangeSinkOperator {
    write: Box<dyn FnMut(Page) + Send>,
    wait_for_writing: Box<dyn Fn() -> BlockedFuture + Send + Sync>,
    on_finish: Box<dyn FnMut() + Send>,
    finished: bool,
}

impl std::fmt::Debug for ExchangeSinkOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSinkOperator").field("finished", &self.finished).finish()
    }
}

impl ExchangeSinkOperator {
    /// Construct a sink adapter from closures over a concrete exchange
    /// writer handle.
    pub fn new(
        write: Box<dyn FnMut(Page) + Send>,
        wait_for_writing: Box<dyn Fn() -> BlockedFuture + Send + Sync>,
        on_finish: Box<dyn FnMut() + Send>,
    ) -> Self {
        Self {
            write,
            wait_for_writing,
            on_finish,
            finished: false,
        }
    }
}

impl OperatorLogic for ExchangeSinkOperator {
    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) {
        (self.write)(page);
    }

    fn get_output(&mut self) -> Option<Page> {
        None
    }

    fn finish(&mut self) {
        if !self.finished {
            (self.on_finish)();
            self.finished = true;
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_blocked(&self) -> BlockedFuture {
        (self.wait_for_writing)()
    }
}

/// Adapts a local exchange source (§4.6) into a Driver-pipeline source
/// operator, the read-side counterpart of [`ExchangeSinkOperator`].
pub struct ExchangeSourceOperator {
    next_page: Box<dyn FnMut() -> Option<Page> + Send>,
    is_finished_fn: Box<dyn Fn() -> bool + Send + Sync>,
}

impl std::fmt::Debug for ExchangeSourceOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSourceOperator").finish_non_exhaustive()
    }
}

impl ExchangeSourceOperator {
    /// Construct a source adapter from closures over a concrete exchange
    /// reader handle.
    pub fn new(
        next_page: Box<dyn FnMut() -> Option<Page> + Send>,
        is_finished_fn: Box<dyn Fn() -> bool + Send + Sync>,
    ) -> Self {
        Self {
            next_page,
            is_finished_fn,
        }
    }
}

impl OperatorLogic for ExchangeSourceOperator {
    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) {
        unreachable!("ExchangeSourceOperator is a source and never needs input");
    }

    fn get_output(&mut self) -> Option<Page> {
        (self.next_page)()
    }

    fn finish(&mut self) {}

    fn is_finished(&self) -> bool {
        (self.is_finished_fn)()
    }
}

/// The terminal operator of a pipeline feeding a Task's Output Buffer
/// (§4.7), adapted through a closure the same way [`ExchangeSinkOperator`]
/// adapts a local exchange writer.
pub struct OutputOperator {
    enqueue: Box<dyn FnMut(Page) + Send>,
    on_finish: Box<dyn FnMut() + Send>,
    finished: bool,
}

impl std::fmt::Debug for OutputOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputOperator").field("finished", &self.finished).finish()
    }
}

impl OutputOperator {
    /// Construct an output adapter over `enqueue`/`on_finish` closures
    /// bound to a Task's output buffer.
    pub fn new(enqueue: Box<dyn FnMut(Page) + Send>, on_finish: Box<dyn FnMut() + Send>) -> Self {
        Self {
            enqueue,
            on_finish,
            finished: false,
        }
    }
}

impl OperatorLogic for OutputOperator {
    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) {
        (self.enqueue)(page);
    }

    fn get_output(&mut self) -> Option<Page> {
        None
    }

    fn finish(&mut self) {
        if !self.finished {
            (self.on_finish)();
            self.finished = true;
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Round-trips pages through the wire codec (optionally spill-encrypted),
/// demonstrating the blocking-operator-spills-to-disk mechanic (§4.2, §9)
/// without an actual filesystem: the "disk" here is an in-memory queue of
/// already-encoded bytes.
pub struct SpillOperator {
    cipher: Option<Arc<dyn SpillCipher>>,
    spilled: VecDeque<Vec<u8>>,
    upstream_finished: bool,
}

impl std::fmt::Debug for SpillOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillOperator")
            .field("spilled_pages", &self.spilled.len())
            .finish()
    }
}

impl SpillOperator {
    /// Construct a spill operator, encrypting spilled pages with `cipher`
    /// when present.
    pub fn new(cipher: Option<Arc<dyn SpillCipher>>) -> Self {
        Self {
            cipher,
            spilled: VecDeque::new(),
            upstream_finished: false,
        }
    }
}

impl OperatorLogic for SpillOperator {
    fn needs_input(&self) -> bool {
        !self.upstream_finished
    }

    fn add_input(&mut self, page: Page) {
        self.spilled.push_back(codec::serialize(&page, self.cipher.as_deref()));
    }

    fn get_output(&mut self) -> Option<Page> {
        let bytes = self.spilled.pop_front()?;
        Some(
            codec::deserialize(&bytes, self.cipher.as_deref())
                .expect("spilled bytes were produced by this operator's own serialize call"),
        )
    }

    fn finish(&mut self) {
        self.upstream_finished = true;
    }

    fn is_finished(&self) -> bool {
        self.upstream_finished && self.spilled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ClosurePageProcessor, ClosureRowProcessor};

    fn int_page(values: &[i32]) -> Page {
        Page::new(vec![Block::IntArray(FixedWidthBlock::new(values.to_vec(), None).unwrap())])
    }

    fn long_page(values: &[i64]) -> Page {
        Page::new(vec![Block::LongArray(FixedWidthBlock::new(values.to_vec(), None).unwrap())])
    }

    #[test]
    fn filter_keeps_only_matching_positions() {
        let mut op = FilterOperator::new(Arc::new(ClosureRowProcessor(|p: &Page, i: usize| {
            p.channel(0).get_long(i).unwrap() % 2 == 0
        })));
        op.add_input(int_page(&[1, 2, 3, 4, 5, 6]));
        op.finish();
        let out = op.get_output().unwrap();
        assert_eq!(out.position_count(), 3);
        assert_eq!(out.channel(0).get_long(0).unwrap(), 2);
        assert_eq!(out.channel(0).get_long(2).unwrap(), 6);
        assert!(op.is_finished());
    }

    #[test]
    fn project_applies_processor_to_every_page() {
        let mut op = ProjectOperator::new(Arc::new(ClosurePageProcessor(|p: &Page| {
            let doubled: Vec<i32> = (0..p.position_count())
                .map(|i| (p.channel(0).get_long(i).unwrap() * 2) as i32)
                .collect();
            Page::new(vec![Block::IntArray(FixedWidthBlock::new(doubled, None).unwrap())])
        })));
        op.add_input(int_page(&[1, 2, 3]));
        let out = op.get_output().unwrap();
        assert_eq!(out.channel(0).get_long(1).unwrap(), 4);
    }

    #[test]
    fn limit_truncates_across_pages_and_then_finishes() {
        let mut op = LimitOperator::new(3);
        op.add_input(int_page(&[1, 2]));
        assert!(op.needs_input());
        op.add_input(int_page(&[3, 4, 5]));
        assert!(!op.needs_input());
        let first = op.get_output().unwrap();
        let second = op.get_output().unwrap();
        assert_eq!(first.position_count() + second.position_count(), 3);
        assert!(op.is_finished());
    }

    #[test]
    fn sort_orders_by_key_channel_after_finish() {
        let mut op = SortOperator::new(0, true);
        op.add_input(int_page(&[3, 1]));
        op.add_input(int_page(&[2]));
        assert!(op.get_output().is_none());
        op.finish();
        let out = op.get_output().unwrap();
        assert_eq!(out.position_count(), 3);
        for (i, expected) in [1, 2, 3].into_iter().enumerate() {
            assert_eq!(out.channel(0).get_long(i).unwrap(), expected);
        }
        assert!(op.is_finished());
    }

    #[test]
    fn top_n_keeps_only_the_largest_k() {
        let mut op = TopNOperator::new(0, false, 2);
        op.add_input(int_page(&[5, 1, 9, 3]));
        op.finish();
        let out = op.get_output().unwrap();
        assert_eq!(out.position_count(), 2);
        assert_eq!(out.channel(0).get_long(0).unwrap(), 9);
        assert_eq!(out.channel(0).get_long(1).unwrap(), 5);
    }

    #[test]
    fn mark_distinct_flags_only_first_occurrence() {
        let mut op = MarkDistinctOperator::new(0);
        op.add_input(int_page(&[1, 1, 2, 1, 2]));
        let out = op.get_output().unwrap();
        let mark_channel = out.channel_count() - 1;
        let marks: Vec<i64> = (0..out.position_count())
            .map(|i| out.channel(mark_channel).get_long(i).unwrap())
            .collect();
        assert_eq!(marks, vec![1, 0, 1, 0, 0]);
    }

    #[test]
    fn aggregation_sums_and_counts_per_group() {
        let mut op = AggregationOperator::new(0, 1);
        let key = long_page(&[1, 2, 1]);
        let value = long_page(&[10, 20, 30]);
        let combined = Page::new(vec![key.channel(0).clone(), value.channel(0).clone()]);
        op.add_input(combined);
        op.finish();
        let out = op.get_output().unwrap();
        assert_eq!(out.position_count(), 2);
        assert_eq!(out.channel(0).get_long(0).unwrap(), 1);
        assert_eq!(out.channel(1).get_long(0).unwrap(), 40);
        assert_eq!(out.channel(2).get_long(0).unwrap(), 2);
    }

    #[test]
    fn hash_build_then_probe_joins_matching_rows() {
        let mut build = HashBuildOperator::new(0);
        build.add_input(Page::new(vec![
            long_page(&[1, 2, 3]).channel(0).clone(),
            long_page(&[100, 200, 300]).channel(0).clone(),
        ]));
        build.finish();
        let table = build.hash_table();

        let mut probe = HashProbeOperator::new(0, table);
        probe.add_input(Page::new(vec![long_page(&[2, 3, 9]).channel(0).clone()]));
        let out = probe.get_output().unwrap();
        assert_eq!(out.position_count(), 2);
        // probe channel 0, then build's two channels.
        assert_eq!(out.channel(0).get_long(0).unwrap(), 2);
        assert_eq!(out.channel(2).get_long(0).unwrap(), 200);
    }

    #[test]
    fn hash_table_panics_if_read_before_finish() {
        let build = HashBuildOperator::new(0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| build.hash_table()));
        assert!(result.is_err());
    }

    #[test]
    fn spill_operator_round_trips_pages() {
        let mut op = SpillOperator::new(None);
        op.add_input(int_page(&[7, 8, 9]));
        let out = op.get_output().unwrap();
        assert_eq!(out.channel(0).get_long(1).unwrap(), 8);
    }

    #[test]
    fn values_operator_replays_pages_then_finishes() {
        let mut op = ValuesOperator::new(vec![int_page(&[1]), int_page(&[2])]);
        assert!(!op.is_finished());
        assert_eq!(op.get_output().unwrap().channel(0).get_long(0).unwrap(), 1);
        assert_eq!(op.get_output().unwrap().channel(0).get_long(0).unwrap(), 2);
        assert!(op.get_output().is_none());
        assert!(op.is_finished());
    }

    #[test]
    fn exchange_sink_forwards_writes_and_tracks_finish() {
        let written = Arc::new(std::sync::Mutex::new(Vec::new()));
        let written2 = Arc::clone(&written);
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let finished2 = Arc::clone(&finished);
        let mut sink = ExchangeSinkOperator::new(
            Box::new(move |p: Page| written2.lock().unwrap().push(p.position_count())),
            Box::new(not_blocked),
            Box::new(move || finished2.store(true, std::sync::atomic::Ordering::SeqCst)),
        );
        sink.add_input(int_page(&[1, 2, 3]));
        sink.finish();
        assert_eq!(*written.lock().unwrap(), vec![3]);
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
        assert!(sink.is_finished());
    }
}
