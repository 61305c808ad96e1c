//! The [`Operator`] trait contract and its closed-enum dispatch (§4.4).

use meridian_page::page::Page;
use meridian_rpc::traits::{not_blocked, BlockedFuture};

/// The per-stage contract a [`crate::Operator`] variant implements (§4.4).
/// A [`crate::Driver`](https://docs.rs/meridian_driver) drives one operator
/// at a time through this state machine: check [`Self::is_blocked`], then
/// either [`Self::add_input`] (if [`Self::needs_input`]) or
/// [`Self::get_output`], until [`Self::is_finished`].
pub trait OperatorLogic: std::fmt::Debug + Send {
    /// Whether this operator can currently accept another input page.
    /// Source operators (Scan, ExchangeSource, Values) never need input
    /// and always return `false`.
    fn needs_input(&self) -> bool;

    /// Hand the operator an input page. Only called when
    /// [`Self::needs_input`] is true.
    fn add_input(&mut self, page: Page);

    /// Produce the next output page, if one is ready. `None` means "no
    /// output right now" (distinct from "finished" — see
    /// [`Self::is_finished`]).
    fn get_output(&mut self) -> Option<Page>;

    /// Signal that no more input pages will arrive (§4.4 "finish"):
    /// blocking operators flush their buffered state into output here.
    fn finish(&mut self);

    /// Whether the operator has no more output to produce, ever.
    fn is_finished(&self) -> bool;

    /// A future that resolves when the operator is ready to make
    /// progress again (§4.3's `isBlocked`/`BlockedFuture` convention).
    /// The default — not blocked — is correct for every operator that
    /// does not itself wait on external backpressure.
    fn is_blocked(&self) -> BlockedFuture {
        not_blocked()
    }

    /// Release any held resources (memory, connector handles). Called
    /// exactly once, whether the operator ran to completion or was
    /// cancelled mid-stream.
    fn close(&mut self) {}
}

/// A polymorphic pipeline stage (§4.4). The named variants cover every
/// operator kind this core implements; `Other` is an escape hatch for
/// connector- or planner-supplied operators whose concrete type isn't
/// one the core needs to special-case.
#[derive(Debug)]
pub enum Operator {
    Scan(crate::variants::ScanOperator),
    Values(crate::variants::ValuesOperator),
    Filter(crate::variants::FilterOperator),
    Project(crate::variants::ProjectOperator),
    Limit(crate::variants::LimitOperator),
    TopN(crate::variants::TopNOperator),
    Sort(crate::variants::SortOperator),
    MarkDistinct(crate::variants::MarkDistinctOperator),
    Aggregation(crate::variants::AggregationOperator),
    Window(crate::variants::WindowOperator),
    HashBuild(crate::variants::HashBuildOperator),
    HashProbe(crate::variants::HashProbeOperator),
    ExchangeSink(crate::variants::ExchangeSinkOperator),
    ExchangeSource(crate::variants::ExchangeSourceOperator),
    Output(crate::variants::OutputOperator),
    Spill(crate::variants::SpillOperator),
    Other(Box<dyn OperatorLogic>),
}

impl Operator {
    /// Whether this operator can currently accept another input page.
    pub fn needs_input(&self) -> bool {
        match self {
            Self::Scan(o) => o.needs_input(),
            Self::Values(o) => o.needs_input(),
            Self::Filter(o) => o.needs_input(),
            Self::Project(o) => o.needs_input(),
            Self::Limit(o) => o.needs_input(),
            Self::TopN(o) => o.needs_input(),
            Self::Sort(o) => o.needs_input(),
            Self::MarkDistinct(o) => o.needs_input(),
            Self::Aggregation(o) => o.needs_input(),
            Self::Window(o) => o.needs_input(),
            Self::HashBuild(o) => o.needs_input(),
            Self::HashProbe(o) => o.needs_input(),
            Self::ExchangeSink(o) => o.needs_input(),
            Self::ExchangeSource(o) => o.needs_input(),
            Self::Output(o) => o.needs_input(),
            Self::Spill(o) => o.needs_input(),
            Self::Other(o) => o.needs_input(),
        }
    }

    /// Hand the operator an input page.
    pub fn add_input(&mut self, page: Page) {
        match self {
            Self::Scan(o) => o.add_input(page),
            Self::Values(o) => o.add_input(page),
            Self::Filter(o) => o.add_input(page),
            Self::Project(o) => o.add_input(page),
            Self::Limit(o) => o.add_input(page),
            Self::TopN(o) => o.add_input(page),
            Self::Sort(o) => o.add_input(page),
            Self::MarkDistinct(o) => o.add_input(page),
            Self::Aggregation(o) => o.add_input(page),
            Self::Window(o) => o.add_input(page),
            Self::HashBuild(o) => o.add_input(page),
            Self::HashProbe(o) => o.add_input(page),
            Self::ExchangeSink(o) => o.add_input(page),
            Self::ExchangeSource(o) => o.add_input(page),
            Self::Output(o) => o.add_input(page),
            Self::Spill(o) => o.add_input(page),
            Self::Other(o) => o.add_input(page),
        }
    }

    /// Produce the next output page, if any.
    pub fn get_output(&mut self) -> Option<Page> {
        match self {
            Self::Scan(o) => o.get_output(),
            Self::Values(o) => o.get_output(),
            Self::Filter(o) => o.get_output(),
            Self::Project(o) => o.get_output(),
            Self::Limit(o) => o.get_output(),
            Self::TopN(o) => o.get_output(),
            Self::Sort(o) => o.get_output(),
            Self::MarkDistinct(o) => o.get_output(),
            Self::Aggregation(o) => o.get_output(),
            Self::Window(o) => o.get_output(),
            Self::HashBuild(o) => o.get_output(),
            Self::HashProbe(o) => o.get_output(),
            Self::ExchangeSink(o) => o.get_output(),
            Self::ExchangeSource(o) => o.get_output(),
            Self::Output(o) => o.get_output(),
            Self::Spill(o) => o.get_output(),
            Self::Other(o) => o.get_output(),
        }
    }

    /// Signal end of input.
    pub fn finish(&mut self) {
        match self {
            Self::Scan(o) => o.finish(),
            Self::Values(o) => o.finish(),
            Self::Filter(o) => o.finish(),
            Self::Project(o) => o.finish(),
            Self::Limit(o) => o.finish(),
            Self::TopN(o) => o.finish(),
            Self::Sort(o) => o.finish(),
            Self::MarkDistinct(o) => o.finish(),
            Self::Aggregation(o) => o.finish(),
            Self::Window(o) => o.finish(),
            Self::HashBuild(o) => o.finish(),
            Self::HashProbe(o) => o.finish(),
            Self::ExchangeSink(o) => o.finish(),
            Self::ExchangeSource(o) => o.finish(),
            Self::Output(o) => o.finish(),
            Self::Spill(o) => o.finish(),
            Self::Other(o) => o.finish(),
        }
    }

    /// Whether the operator has no more output to produce, ever.
    pub fn is_finished(&self) -> bool {
        match self {
            Self::Scan(o) => o.is_finished(),
            Self::Values(o) => o.is_finished(),
            Self::Filter(o) => o.is_finished(),
            Self::Project(o) => o.is_finished(),
            Self::Limit(o) => o.is_finished(),
            Self::TopN(o) => o.is_finished(),
            Self::Sort(o) => o.is_finished(),
            Self::MarkDistinct(o) => o.is_finished(),
            Self::Aggregation(o) => o.is_finished(),
            Self::Window(o) => o.is_finished(),
            Self::HashBuild(o) => o.is_finished(),
            Self::HashProbe(o) => o.is_finished(),
            Self::ExchangeSink(o) => o.is_finished(),
            Self::ExchangeSource(o) => o.is_finished(),
            Self::Output(o) => o.is_finished(),
            Self::Spill(o) => o.is_finished(),
            Self::Other(o) => o.is_finished(),
        }
    }

    /// A future resolving when the operator can make progress again.
    pub fn is_blocked(&self) -> BlockedFuture {
        match self {
            Self::Scan(o) => o.is_blocked(),
            Self::Values(o) => o.is_blocked(),
            Self::Filter(o) => o.is_blocked(),
            Self::Project(o) => o.is_blocked(),
            Self::Limit(o) => o.is_blocked(),
            Self::TopN(o) => o.is_blocked(),
            Self::Sort(o) => o.is_blocked(),
            Self::MarkDistinct(o) => o.is_blocked(),
            Self::Aggregation(o) => o.is_blocked(),
            Self::Window(o) => o.is_blocked(),
            Self::HashBuild(o) => o.is_blocked(),
            Self::HashProbe(o) => o.is_blocked(),
            Self::ExchangeSink(o) => o.is_blocked(),
            Self::ExchangeSource(o) => o.is_blocked(),
            Self::Output(o) => o.is_blocked(),
            Self::Spill(o) => o.is_blocked(),
            Self::Other(o) => o.is_blocked(),
        }
    }

    /// Release held resources. Idempotent at the call-site's discretion;
    /// each variant's own `close` should tolerate repeat calls.
    pub fn close(&mut self) {
        match self {
            Self::Scan(o) => o.close(),
            Self::Values(o) => o.close(),
            Self::Filter(o) => o.close(),
            Self::Project(o) => o.close(),
            Self::Limit(o) => o.close(),
            Self::TopN(o) => o.close(),
            Self::Sort(o) => o.close(),
            Self::MarkDistinct(o) => o.close(),
            Self::Aggregation(o) => o.close(),
            Self::Window(o) => o.close(),
            Self::HashBuild(o) => o.close(),
            Self::HashProbe(o) => o.close(),
            Self::ExchangeSink(o) => o.close(),
            Self::ExchangeSource(o) => o.close(),
            Self::Output(o) => o.close(),
            Self::Spill(o) => o.close(),
            Self::Other(o) => o.close(),
        }
    }
}
