// 🏆 Ranking Input - Hand-off to an external ranking engine
//
// The engine itself (PageRank-style scoring) is outside this crate. This
// module packages the weighted graph with one identity proposal per
// participant and defines the seam an engine plugs into.

use crate::graph::{Addresser, NodeAddress, WeightedGraph};
use crate::resolver::ResolvedTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One participant as the ranking engine should know them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Entity id (slug)
    pub name: String,

    /// Plugin the identity is proposed by
    pub plugin: String,

    pub description: String,

    /// Participant node the identity aliases
    pub alias: NodeAddress,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingInput {
    pub graph: WeightedGraph,
    pub identities: Vec<Identity>,
}

impl RankingInput {
    /// Collect identities from every tree, one per slug
    ///
    /// When the same participant appears in several periods the first tree
    /// that knows an address for them wins.
    pub fn new<'a>(
        graph: WeightedGraph,
        trees: impl IntoIterator<Item = &'a ResolvedTree>,
        addresser: &Addresser,
        plugin: &str,
    ) -> Self {
        let mut identities: BTreeMap<String, Identity> = BTreeMap::new();

        for tree in trees {
            for entity in tree.entities.values() {
                let identity = identities.entry(entity.id.clone()).or_insert_with(|| Identity {
                    name: entity.id.clone(),
                    plugin: plugin.to_string(),
                    description: entity.name.clone(),
                    alias: addresser.participant(&entity.id),
                    address: None,
                });
                if identity.address.is_none() {
                    identity.address = entity.address.clone();
                }
            }
        }

        RankingInput {
            graph,
            identities: identities.into_values().collect(),
        }
    }

    pub fn identity(&self, name: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    pub score: f64,
}

/// Ranking engine trait - implement this for each scoring backend
pub trait RankingEngine {
    fn name(&self) -> &str;

    /// Score every identity in the input
    fn rank(&self, input: &RankingInput) -> anyhow::Result<Vec<Score>>;
}
