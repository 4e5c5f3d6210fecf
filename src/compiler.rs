// ⚙️ Graph Compiler - Resolved tree → weighted graph
//
// Two weighting policies:
//
//   Flow        - one edge per (actor, destination) with a non-zero amount,
//                 from the actor's participant node, weight = amount
//   Probability - one edge per destination from the block node,
//                 weight = destination total / block grand total
//
// Both recurse into destinations that are blocks. With a period, an epoch
// node is emitted and linked to the root with a DIVIDED_BY edge of weight 1.

use crate::entities::Entity;
use crate::error::{CircleError, Result};
use crate::graph::{Addresser, Edge, EdgeKind, Node, NodeKind, WeightedGraph};
use crate::period::Period;
use crate::resolver::{Destination, ResolvedBlock, ResolvedTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightPolicy {
    /// Edges carry raw allotments from each actor
    Flow,

    /// Edges carry each destination's share of its block
    #[default]
    Probability,
}

impl FromStr for WeightPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flow" => Ok(WeightPolicy::Flow),
            "probability" | "prob" => Ok(WeightPolicy::Probability),
            other => Err(format!("unknown weight policy {other:?} (expected flow or probability)")),
        }
    }
}

impl fmt::Display for WeightPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightPolicy::Flow => f.write_str("flow"),
            WeightPolicy::Probability => f.write_str("probability"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphCompiler {
    policy: WeightPolicy,
    addresser: Addresser,
}

/// Per-run values threaded through the recursion
struct Run<'a> {
    tree: &'a ResolvedTree,
    period_key: Option<String>,
    timestamp_ms: Option<i64>,
    visited: BTreeSet<String>,
}

impl GraphCompiler {
    pub fn new(policy: WeightPolicy) -> Self {
        GraphCompiler {
            policy,
            addresser: Addresser::default(),
        }
    }

    pub fn with_addresser(mut self, addresser: Addresser) -> Self {
        self.addresser = addresser;
        self
    }

    pub fn policy(&self) -> WeightPolicy {
        self.policy
    }

    pub fn addresser(&self) -> &Addresser {
        &self.addresser
    }

    /// Compile one tree into a fresh graph
    pub fn compile(&self, tree: &ResolvedTree, period: Option<&Period>) -> Result<WeightedGraph> {
        let mut graph = WeightedGraph::new();
        self.compile_into(&mut graph, tree, period)?;
        Ok(graph)
    }

    /// Compile one tree into an existing graph (several periods can share one)
    ///
    /// # Errors
    /// * `NoRoot` - the tree's root id is not in its block arena
    /// * `CycleDetected` - a block is reached twice
    /// * `ConflictingEdge` - an edge address already holds different contents
    pub fn compile_into(
        &self,
        graph: &mut WeightedGraph,
        tree: &ResolvedTree,
        period: Option<&Period>,
    ) -> Result<()> {
        let root = tree
            .root_block()
            .ok_or_else(|| CircleError::NoRoot(tree.root.clone()))?;

        let mut run = Run {
            tree,
            period_key: period.map(Period::key),
            timestamp_ms: period.map(Period::end_timestamp_ms),
            visited: BTreeSet::new(),
        };

        let root_node = self.circle_node(&run, root, run.timestamp_ms);
        let root_address = root_node.address.clone();
        graph.add_node(root_node);

        if let (Some(period), Some(key)) = (period, run.period_key.as_deref()) {
            let epoch = Node {
                address: self.addresser.epoch(key),
                kind: NodeKind::Epoch,
                description: format!("epoch: {}", period.label),
                timestamp_ms: run.timestamp_ms,
            };
            let edge = Edge {
                address: self.addresser.edge(
                    EdgeKind::DividedBy,
                    Some(key),
                    &[tag(NodeKind::Epoch, key), tag(NodeKind::Circle, &root.block.id)],
                ),
                kind: EdgeKind::DividedBy,
                src: epoch.address.clone(),
                dst: root_address,
                weight: 1.0,
                timestamp_ms: run.timestamp_ms,
            };
            graph.add_node(epoch);
            graph.add_edge(edge)?;
        }

        self.distribute(graph, &mut run, &tree.root)?;

        tracing::debug!(
            root = %root.block.name,
            policy = %self.policy,
            period = run.period_key.as_deref().unwrap_or("-"),
            blocks = run.visited.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "compiled allocation tree"
        );

        Ok(())
    }

    fn distribute(&self, graph: &mut WeightedGraph, run: &mut Run<'_>, block_id: &str) -> Result<()> {
        let tree = run.tree;
        let resolved = tree
            .block(block_id)
            .ok_or_else(|| CircleError::UnresolvedDestination {
                block: block_id.to_string(),
                destination: block_id.to_string(),
                reason: "block is linked but missing from the tree".to_string(),
            })?;

        if !run.visited.insert(block_id.to_string()) {
            return Err(CircleError::CycleDetected(resolved.block.name.clone()));
        }

        let block = &resolved.block;
        let src_address = self.addresser.circle(run.period_key.as_deref(), &block.id);

        let grand_total = block.grand_total();
        for (dest_id, link) in block.destinations.iter().zip(&resolved.links) {
            let dest_node = self.destination_node(run, link)?;
            let dest_address = dest_node.address.clone();
            graph.add_node(dest_node);

            match self.policy {
                WeightPolicy::Probability => {
                    let total = block.total(dest_id);
                    if total <= 0.0 || grand_total <= 0.0 {
                        continue;
                    }
                    let edge = Edge {
                        address: self.addresser.edge(
                            EdgeKind::DistributedTo,
                            run.period_key.as_deref(),
                            &[tag(NodeKind::Circle, &block.id), link_tag(link)],
                        ),
                        kind: EdgeKind::DistributedTo,
                        src: src_address.clone(),
                        dst: dest_address,
                        weight: total / grand_total,
                        timestamp_ms: run.timestamp_ms,
                    };
                    graph.add_edge(edge)?;
                }
                WeightPolicy::Flow => {
                    for actor in &block.actors {
                        let amount = block.allotment(dest_id, actor);
                        if amount <= 0.0 {
                            continue;
                        }
                        let actor_node = self.participant_node(tree.entity(actor), actor);
                        let actor_address = actor_node.address.clone();
                        graph.add_node(actor_node);

                        let edge = Edge {
                            address: self.addresser.edge(
                                EdgeKind::DistributedTo,
                                run.period_key.as_deref(),
                                &[
                                    tag(NodeKind::Participant, actor),
                                    tag(NodeKind::Circle, &block.id),
                                    link_tag(link),
                                ],
                            ),
                            kind: EdgeKind::DistributedTo,
                            src: actor_address,
                            dst: dest_address.clone(),
                            weight: amount,
                            timestamp_ms: run.timestamp_ms,
                        };
                        graph.add_edge(edge)?;
                    }
                }
            }
        }

        for child in resolved.children() {
            self.distribute(graph, run, child)?;
        }

        Ok(())
    }

    fn destination_node(&self, run: &Run<'_>, link: &Destination) -> Result<Node> {
        match link {
            Destination::Block(id) => {
                let child = run.tree.block(id).ok_or_else(|| CircleError::UnresolvedDestination {
                    block: id.clone(),
                    destination: id.clone(),
                    reason: "block is linked but missing from the tree".to_string(),
                })?;
                Ok(self.circle_node(run, child, None))
            }
            Destination::Leaf(id) => Ok(self.participant_node(run.tree.entity(id), id)),
        }
    }

    fn circle_node(&self, run: &Run<'_>, block: &ResolvedBlock, timestamp_ms: Option<i64>) -> Node {
        Node {
            address: self.addresser.circle(run.period_key.as_deref(), &block.block.id),
            kind: NodeKind::Circle,
            description: format!("circle: {}", block.block.name),
            timestamp_ms,
        }
    }

    fn participant_node(&self, entity: Option<&Entity>, id: &str) -> Node {
        let name = entity.map(|e| e.name.as_str()).unwrap_or(id);
        Node {
            address: self.addresser.participant(id),
            kind: NodeKind::Participant,
            description: format!("participant: {name}"),
            timestamp_ms: None,
        }
    }
}

fn tag(kind: NodeKind, id: &str) -> String {
    format!("{}:{}", kind.tag(), id)
}

fn link_tag(link: &Destination) -> String {
    let kind = if link.is_block() { NodeKind::Circle } else { NodeKind::Participant };
    tag(kind, link.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::IdentityRegistry;
    use crate::graph::NodeAddress;
    use crate::grid::Grid;
    use crate::resolver::resolve_hierarchy;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn tree_from(rows: Vec<Vec<&str>>) -> ResolvedTree {
        let mut registry = IdentityRegistry::new();
        resolve_hierarchy(&Grid::from_rows(rows), &mut registry)
            .unwrap()
            .tree
    }

    fn top_only() -> ResolvedTree {
        tree_from(vec![
            vec!["Top", "A", "B", ""],
            vec!["alice", "3", "1", ""],
            vec!["bob", "0", "2", ""],
        ])
    }

    fn nested() -> ResolvedTree {
        tree_from(vec![
            vec!["Top", "Builders", "Zed", ""],
            vec!["alice", "6", "2", ""],
            vec![],
            vec!["Builders", "carol", "dave", ""],
            vec!["carol", "0", "3", ""],
            vec!["dave", "1", "0", ""],
        ])
    }

    fn weight(graph: &WeightedGraph, src: &NodeAddress, dst: &NodeAddress) -> Option<f64> {
        graph
            .out_edges(src)
            .find(|e| &e.dst == dst)
            .map(|e| e.weight)
    }

    #[test]
    fn test_flow_edges() {
        let tree = top_only();
        let compiler = GraphCompiler::new(WeightPolicy::Flow);
        let graph = compiler.compile(&tree, None).unwrap();
        let a = compiler.addresser();

        let alice = a.participant("alice");
        let bob = a.participant("bob");
        let dest_a = a.participant("a");
        let dest_b = a.participant("b");

        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.edge_count(), tree.root_block().unwrap().block.nonzero_pairs());
        assert_eq!(weight(&graph, &alice, &dest_a), Some(3.0));
        assert_eq!(weight(&graph, &alice, &dest_b), Some(1.0));
        assert_eq!(weight(&graph, &bob, &dest_b), Some(2.0));
        assert_eq!(weight(&graph, &bob, &dest_a), None);
    }

    #[test]
    fn test_edge_addresses_tag_circles_and_participants() {
        let compiler = GraphCompiler::new(WeightPolicy::Probability);
        let graph = compiler.compile(&nested(), None).unwrap();

        let addresses: Vec<&str> = graph.edges.values().map(|e| e.address.as_str()).collect();
        let prefix = "wtf/metagame/coordinape/DISTRIBUTED_TO";
        assert!(addresses.contains(&format!("{prefix}/circle:top/circle:builders").as_str()));
        assert!(addresses.contains(&format!("{prefix}/circle:top/participant:zed").as_str()));
        assert!(addresses.contains(&format!("{prefix}/circle:builders/participant:dave").as_str()));
    }

    #[test]
    fn test_probability_edges() {
        let tree = top_only();
        let compiler = GraphCompiler::new(WeightPolicy::Probability);
        let graph = compiler.compile(&tree, None).unwrap();
        let a = compiler.addresser();

        let top = a.circle(None, "top");
        assert_eq!(graph.edge_count(), 2);
        assert_relative_eq!(weight(&graph, &top, &a.participant("a")).unwrap(), 0.5);
        assert_relative_eq!(weight(&graph, &top, &a.participant("b")).unwrap(), 0.5);
    }

    #[test]
    fn test_probability_recurses_into_child_blocks() {
        let tree = nested();
        let compiler = GraphCompiler::default();
        let graph = compiler.compile(&tree, None).unwrap();
        let a = compiler.addresser();

        let top = a.circle(None, "top");
        let builders = a.circle(None, "builders");
        assert_relative_eq!(weight(&graph, &top, &builders).unwrap(), 0.75);
        assert_relative_eq!(weight(&graph, &top, &a.participant("zed")).unwrap(), 0.25);
        assert_relative_eq!(weight(&graph, &builders, &a.participant("carol")).unwrap(), 0.25);
        assert_relative_eq!(weight(&graph, &builders, &a.participant("dave")).unwrap(), 0.75);

        // epoch-free compile has no epoch node
        assert_eq!(graph.nodes_of_kind(NodeKind::Epoch).count(), 0);
    }

    #[test]
    fn test_flow_recurses_and_counts_pairs() {
        let tree = nested();
        let graph = GraphCompiler::new(WeightPolicy::Flow).compile(&tree, None).unwrap();

        let pairs: usize = tree.blocks.values().map(|b| b.block.nonzero_pairs()).sum();
        assert_eq!(graph.edge_count(), pairs);
    }

    #[test]
    fn test_zero_total_destination_gets_node_but_no_edge() {
        let tree = tree_from(vec![
            vec!["Top", "A", "B", ""],
            vec!["alice", "4", "0", ""],
        ]);
        let compiler = GraphCompiler::default();
        let graph = compiler.compile(&tree, None).unwrap();

        assert!(graph.node(&compiler.addresser().participant("b")).is_some());
        assert_eq!(graph.edge_count(), 1);

        let all_zero = tree_from(vec![vec!["Top", "A", ""], vec!["alice", "0", ""]]);
        let graph = compiler.compile(&all_zero, None).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_period_adds_epoch_and_timestamps() {
        let tree = top_only();
        let period = Period::parse("March 2022").unwrap();
        let compiler = GraphCompiler::default();
        let graph = compiler.compile(&tree, Some(&period)).unwrap();
        let a = compiler.addresser();

        let epoch = a.epoch("2022-03");
        let root = a.circle(Some("2022-03"), "top");
        assert!(graph.node(&epoch).is_some());
        assert_eq!(weight(&graph, &epoch, &root), Some(1.0));

        let ts = period.end_timestamp_ms();
        assert!(graph.edges.values().all(|e| e.timestamp_ms == Some(ts)));
        assert_eq!(graph.node(&root).unwrap().timestamp_ms, Some(ts));
    }

    #[test]
    fn test_two_periods_share_participants() {
        let tree = top_only();
        let compiler = GraphCompiler::new(WeightPolicy::Flow);
        let mut graph = WeightedGraph::new();

        let march = Period::parse("March 2022").unwrap();
        let april = Period::parse("April 2022").unwrap();
        compiler.compile_into(&mut graph, &tree, Some(&march)).unwrap();
        compiler.compile_into(&mut graph, &tree, Some(&april)).unwrap();

        // alice, bob, a, b once each; two roots; two epochs
        assert_eq!(graph.nodes_of_kind(NodeKind::Participant).count(), 4);
        assert_eq!(graph.nodes_of_kind(NodeKind::Circle).count(), 2);
        assert_eq!(graph.nodes_of_kind(NodeKind::Epoch).count(), 2);
        assert_eq!(graph.edge_count(), 2 * (3 + 1));

        // recompiling the same period is a no-op
        let before = graph.clone();
        compiler.compile_into(&mut graph, &tree, Some(&march)).unwrap();
        assert_eq!(graph, before);
    }

    #[test]
    fn test_missing_root_and_cycle() {
        let mut tree = top_only();
        tree.root = "nowhere".to_string();
        assert_eq!(
            GraphCompiler::default().compile(&tree, None),
            Err(CircleError::NoRoot("nowhere".to_string()))
        );

        // hand-built tree where the root links back to itself
        let mut cyclic = top_only();
        let root = cyclic.blocks.get_mut("top").unwrap();
        root.links[0] = Destination::Block("top".to_string());
        assert_eq!(
            GraphCompiler::default().compile(&cyclic, None),
            Err(CircleError::CycleDetected("Top".to_string()))
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("flow".parse::<WeightPolicy>(), Ok(WeightPolicy::Flow));
        assert_eq!("Probability".parse::<WeightPolicy>(), Ok(WeightPolicy::Probability));
        assert!("pagerank".parse::<WeightPolicy>().is_err());
        assert_eq!(WeightPolicy::default(), WeightPolicy::Probability);
    }

    proptest! {
        #[test]
        fn prop_probability_weights_sum_to_one(
            amounts in proptest::collection::vec(
                proptest::collection::vec(0u32..50, 4),
                1..6,
            )
        ) {
            let mut rows = vec![vec![
                "Top".to_string(), "W".to_string(), "X".to_string(),
                "Y".to_string(), "Z".to_string(), String::new(),
            ]];
            for (i, row) in amounts.iter().enumerate() {
                let mut cells = vec![format!("actor {i}")];
                cells.extend(row.iter().map(|n| n.to_string()));
                cells.push(String::new());
                rows.push(cells);
            }

            let mut registry = IdentityRegistry::new();
            let tree = resolve_hierarchy(&Grid::new(rows), &mut registry).unwrap().tree;
            let compiler = GraphCompiler::default();
            let graph = compiler.compile(&tree, None).unwrap();

            let top = compiler.addresser().circle(None, "top");
            let sum: f64 = graph.out_edges(&top).map(|e| e.weight).sum();
            let grand: u32 = amounts.iter().flatten().sum();
            if grand == 0 {
                prop_assert_eq!(graph.edge_count(), 0);
            } else {
                prop_assert!((sum - 1.0).abs() < 1e-9);
            }
        }
    }
}
