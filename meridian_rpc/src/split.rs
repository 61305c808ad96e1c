//! [`Split`]: the opaque, connector-produced description of a chunk of
//! source data a Task consumes (§3).

use crate::ids::SplitId;

/// An opaque, serializable description of a chunk of source data produced
/// by a connector. The core never interprets the payload — only a
/// connector's `ConnectorPageSource` does — it just carries it from a
/// `SplitSource` to the Task that will scan it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    id: SplitId,
    /// Connector-defined opaque bytes (e.g. a serialized file path + byte
    /// range, or a Kafka topic/partition/offset range).
    payload: Vec<u8>,
    /// Node ids the connector reports as holding this split's data, used by
    /// the stage scheduler's affinity tie-break (§4.9). Empty if the
    /// connector has no locality preference.
    preferred_nodes: Vec<crate::ids::NodeId>,
}

impl Split {
    /// Construct a split from its id, opaque payload, and preferred nodes.
    pub fn new(id: SplitId, payload: Vec<u8>, preferred_nodes: Vec<crate::ids::NodeId>) -> Self {
        Self {
            id,
            payload,
            preferred_nodes,
        }
    }

    /// This split's id.
    pub fn id(&self) -> SplitId {
        self.id
    }

    /// The connector-opaque payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Nodes the connector reports as colocated with this split's data.
    pub fn preferred_nodes(&self) -> &[crate::ids::NodeId] {
        &self.preferred_nodes
    }
}

/// A bounded batch of [`Split`]s plus whether the source is now exhausted,
/// returned by [`crate::traits::SplitSource::next`].
#[derive(Debug, Clone)]
pub struct SplitBatch {
    /// The splits in this batch (may be empty even if not the last batch).
    pub splits: Vec<Split>,
    /// Whether the connector will never produce another split after this.
    pub no_more_splits: bool,
}
