use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

// ============================================================================
// Placement - Which node is authoritative for an entity
// ============================================================================
//
// The membership / consistent-hash layer is an external service. The
// directory only asks it one question: who owns this key right now? At most
// one node is authoritative for a key at any instant; short overlaps while
// the cluster rebalances are caught by the event log's version check.
//
// ============================================================================

/// Identity of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn local() -> Self {
        Self::new("local")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("no nodes available")]
    NoNodes,

    #[error("placement service unavailable: {0}")]
    Unavailable(String),
}

/// Placement / membership service.
#[async_trait]
pub trait Placement: Send + Sync {
    /// Node currently authoritative for `key` (an entity stream key).
    async fn locate(&self, key: &str) -> Result<NodeId, PlacementError>;
}

/// Single-node deployment: every entity lives here.
#[derive(Debug, Clone)]
pub struct LocalPlacement {
    node: NodeId,
}

impl LocalPlacement {
    pub fn new(node: NodeId) -> Self {
        Self { node }
    }
}

impl Default for LocalPlacement {
    fn default() -> Self {
        Self::new(NodeId::local())
    }
}

#[async_trait]
impl Placement for LocalPlacement {
    async fn locate(&self, _key: &str) -> Result<NodeId, PlacementError> {
        Ok(self.node.clone())
    }
}

/// Rendezvous (highest random weight) hashing over a static node set.
///
/// Every node computes the same owner for a key without coordination, and
/// removing a node only moves the keys it owned.
#[derive(Debug, Clone)]
pub struct RendezvousPlacement {
    nodes: Vec<NodeId>,
}

impl RendezvousPlacement {
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn owner(&self, key: &str) -> Option<&NodeId> {
        self.nodes.iter().max_by_key(|node| weight(node, key))
    }
}

// DefaultHasher uses fixed keys, so weights agree across processes built
// from the same toolchain.
fn weight(node: &NodeId, key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    node.hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl Placement for RendezvousPlacement {
    async fn locate(&self, key: &str) -> Result<NodeId, PlacementError> {
        self.owner(key).cloned().ok_or(PlacementError::NoNodes)
    }
}
