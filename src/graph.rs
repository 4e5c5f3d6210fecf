// 🕸️ Weighted Graph - What the ranking engine consumes
//
// Nodes and edges are keyed by slash-separated addresses:
//
//   <prefix>/EPOCH/2022-03
//   <prefix>/CIRCLE/2022-03/builders
//   <prefix>/PARTICIPANT/alice
//   <prefix>/DISTRIBUTED_TO/2022-03/circle:top/participant:zed
//
// Circles and edges are namespaced by period so several months can share one
// graph; participants are not, so a person keeps one node across months.

use crate::error::{CircleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// ADDRESSES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeAddress(String);

impl NodeAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl EdgeAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for EdgeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// The period a sheet covers
    Epoch,

    /// An allocation block
    Circle,

    /// A person (actor or leaf destination)
    Participant,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Epoch => "EPOCH",
            NodeKind::Circle => "CIRCLE",
            NodeKind::Participant => "PARTICIPANT",
        }
    }

    /// Lowercase tag used inside edge addresses ("circle:top")
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Epoch => "epoch",
            NodeKind::Circle => "circle",
            NodeKind::Participant => "participant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Epoch → the root circle that divides it
    DividedBy,

    /// Circle (or actor) → a destination
    DistributedTo,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::DividedBy => "DIVIDED_BY",
            EdgeKind::DistributedTo => "DISTRIBUTED_TO",
        }
    }
}

/// Builds addresses under a fixed prefix
#[derive(Debug, Clone, PartialEq)]
pub struct Addresser {
    prefix: Vec<String>,
}

impl Addresser {
    pub fn new<I, S>(prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Addresser {
            prefix: prefix.into_iter().map(Into::into).collect(),
        }
    }

    fn join(&self, head: &str, parts: &[&str]) -> String {
        self.prefix
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(head))
            .chain(parts.iter().copied().filter(|p| !p.is_empty()))
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn epoch(&self, period_key: &str) -> NodeAddress {
        NodeAddress(self.join(NodeKind::Epoch.as_str(), &[period_key]))
    }

    /// Circle node, namespaced by period when there is one
    pub fn circle(&self, period_key: Option<&str>, id: &str) -> NodeAddress {
        NodeAddress(self.join(NodeKind::Circle.as_str(), &[period_key.unwrap_or(""), id]))
    }

    pub fn participant(&self, id: &str) -> NodeAddress {
        NodeAddress(self.join(NodeKind::Participant.as_str(), &[id]))
    }

    /// Edge address from `kind:id` endpoint tags
    pub fn edge(&self, kind: EdgeKind, period_key: Option<&str>, endpoints: &[String]) -> EdgeAddress {
        let mut parts = vec![period_key.unwrap_or("")];
        parts.extend(endpoints.iter().map(String::as_str));
        EdgeAddress(self.join(kind.as_str(), &parts))
    }

    /// Prefix every address of a given node kind starts with
    pub fn node_prefix(&self, kind: NodeKind) -> String {
        format!("{}/", self.join(kind.as_str(), &[]))
    }
}

impl Default for Addresser {
    fn default() -> Self {
        Addresser::new(["wtf", "metagame", "coordinape"])
    }
}

// ============================================================================
// NODES + EDGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub address: NodeAddress,
    pub kind: NodeKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub address: EdgeAddress,
    pub kind: EdgeKind,
    pub src: NodeAddress,
    pub dst: NodeAddress,

    /// Forward weight; non-negative and finite
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
}

// ============================================================================
// GRAPH
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedGraph {
    pub nodes: BTreeMap<NodeAddress, Node>,
    pub edges: BTreeMap<EdgeAddress, Edge>,
}

impl WeightedGraph {
    pub fn new() -> Self {
        WeightedGraph::default()
    }

    /// Insert a node; re-adding an existing address is a no-op.
    /// Returns true when the node was new.
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(&node.address) {
            return false;
        }
        self.nodes.insert(node.address.clone(), node);
        true
    }

    /// Insert an edge between existing nodes
    ///
    /// Re-adding an identical edge is a no-op (so runs can be unioned);
    /// the same address with different contents is an error.
    pub fn add_edge(&mut self, edge: Edge) -> Result<bool> {
        if !self.nodes.contains_key(&edge.src) || !self.nodes.contains_key(&edge.dst) {
            return Err(CircleError::DanglingEdge(edge.address.to_string()));
        }

        match self.edges.get(&edge.address) {
            Some(existing) if *existing == edge => Ok(false),
            Some(_) => Err(CircleError::ConflictingEdge(edge.address.to_string())),
            None => {
                self.edges.insert(edge.address.clone(), edge);
                Ok(true)
            }
        }
    }

    /// Union another graph into this one
    pub fn merge(&mut self, other: WeightedGraph) -> Result<()> {
        for node in other.nodes.into_values() {
            self.add_node(node);
        }
        for edge in other.edges.into_values() {
            self.add_edge(edge)?;
        }
        Ok(())
    }

    pub fn node(&self, address: &NodeAddress) -> Option<&Node> {
        self.nodes.get(address)
    }

    pub fn out_edges<'a>(&'a self, src: &'a NodeAddress) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| &e.src == src)
    }

    pub fn in_edges<'a>(&'a self, dst: &'a NodeAddress) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| &e.dst == dst)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.kind == kind)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
