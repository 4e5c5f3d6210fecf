// 🔲 Allocation Block - One circle's actors × destinations matrix
//
// Everything is keyed by canonical id. Surface spellings of destinations are
// kept separately so the resolver can hand them to the registry unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive row range a block occupied in the grid (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationBlock {
    /// Canonical id of the block name
    pub id: String,

    /// Block name as written in the header cell
    pub name: String,

    /// Entity ids of the actor rows, in row order, no repeats
    pub actors: Vec<String>,

    /// Canonical ids of the destination columns, in column order, no repeats
    pub destinations: Vec<String>,

    /// destination id → header spelling
    pub destination_names: BTreeMap<String, String>,

    /// destination id → actor id → amount (zero amounts omitted)
    pub allotments: BTreeMap<String, BTreeMap<String, f64>>,

    /// destination id → column sum (every destination present, zeros included)
    pub totals: BTreeMap<String, f64>,

    pub rows: RowSpan,
}

impl AllocationBlock {
    /// Amount one actor gave one destination (0 when absent)
    pub fn allotment(&self, destination: &str, actor: &str) -> f64 {
        self.allotments
            .get(destination)
            .and_then(|by_actor| by_actor.get(actor))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn total(&self, destination: &str) -> f64 {
        self.totals.get(destination).copied().unwrap_or(0.0)
    }

    /// Sum of all destination totals
    pub fn grand_total(&self) -> f64 {
        self.totals.values().sum()
    }

    /// Number of (actor, destination) pairs with a non-zero amount
    pub fn nonzero_pairs(&self) -> usize {
        self.allotments
            .values()
            .map(|by_actor| by_actor.values().filter(|amount| **amount > 0.0).count())
            .sum()
    }

    /// Header spelling of a destination, falling back to its id
    pub fn destination_name<'a>(&'a self, destination: &'a str) -> &'a str {
        self.destination_names
            .get(destination)
            .map(String::as_str)
            .unwrap_or(destination)
    }

    /// Totals recomputed from the allotments
    pub fn recompute_totals(&self) -> BTreeMap<String, f64> {
        self.destinations
            .iter()
            .map(|d| {
                let sum = self
                    .allotments
                    .get(d)
                    .map(|by_actor| by_actor.values().sum::<f64>())
                    .unwrap_or(0.0);
                (d.clone(), sum)
            })
            .collect()
    }

    /// Check the structural invariants: allotments only reference known
    /// actors/destinations, amounts are non-negative, totals match
    pub fn is_consistent(&self) -> bool {
        let refs_ok = self.allotments.iter().all(|(d, by_actor)| {
            self.destinations.contains(d)
                && by_actor
                    .iter()
                    .all(|(a, amount)| self.actors.contains(a) && amount.is_finite() && *amount >= 0.0)
        });

        let totals_ok = self.recompute_totals().iter().all(|(d, sum)| {
            (self.total(d) - sum).abs() <= 1e-9 * sum.abs().max(1.0)
        }) && self.totals.len() == self.destinations.len();

        refs_ok && totals_ok
    }
}
