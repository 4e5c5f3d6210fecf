// ⚙️ Config - Run settings loaded from JSON
//
// Every field has a default, so `{}` is a valid config file.

use crate::compiler::{GraphCompiler, WeightPolicy};
use crate::entities::LeafPolicy;
use crate::graph::Addresser;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How compiled edges are weighted
    pub policy: WeightPolicy,

    /// Leading segments of every node and edge address
    pub address_prefix: Vec<String>,

    /// Whether unknown leaf names are accepted when an address book is loaded
    pub leaf_policy: LeafPolicy,

    /// Plugin name stamped on identity proposals
    pub plugin_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            policy: WeightPolicy::default(),
            address_prefix: vec![
                "wtf".to_string(),
                "metagame".to_string(),
                "coordinape".to_string(),
            ],
            leaf_policy: LeafPolicy::default(),
            plugin_name: "Multilevel-Coordinape".to_string(),
        }
    }
}

impl Config {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        if config.address_prefix.iter().any(|part| part.trim().is_empty()) {
            anyhow::bail!("address_prefix entries must not be empty");
        }

        Ok(config)
    }

    pub fn addresser(&self) -> Addresser {
        Addresser::new(self.address_prefix.iter().cloned())
    }

    /// Compiler configured with this policy and prefix
    pub fn compiler(&self) -> GraphCompiler {
        GraphCompiler::new(self.policy).with_addresser(self.addresser())
    }
}
