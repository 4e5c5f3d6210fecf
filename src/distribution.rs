// 💰 Payout Distribution - Split an amount down the allocation tree
//
// The root gets the whole amount. Each block hands it on to its destinations
// in proportion to their column totals; a leaf keeps what reaches it. A
// participant named as a leaf in several blocks collects from all of them.

use crate::error::{CircleError, Result};
use crate::resolver::{Destination, ResolvedTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What one participant receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub amount: f64,
}

/// Distribute `amount` over the leaves of `tree`
///
/// Payouts are ordered by entity id; participants receiving nothing are left
/// out.
///
/// # Errors
/// * `InvalidAmount` - negative, NaN or infinite amount
/// * `NothingAllocated` - a block with an all-zero matrix receives a share
/// * `NoRoot` / `CycleDetected` - malformed hand-built trees
pub fn distribute(tree: &ResolvedTree, amount: f64) -> Result<Vec<Payout>> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(CircleError::InvalidAmount(amount));
    }
    if tree.root_block().is_none() {
        return Err(CircleError::NoRoot(tree.root.clone()));
    }

    let mut shares: BTreeMap<String, f64> = BTreeMap::new();
    let mut visited = BTreeSet::new();
    split(tree, &tree.root, amount, &mut shares, &mut visited)?;

    let payouts: Vec<Payout> = shares
        .into_iter()
        .filter(|(_, share)| *share > 0.0)
        .map(|(id, share)| {
            let entity = tree.entity(&id);
            Payout {
                name: entity.map(|e| e.name.clone()).unwrap_or_else(|| id.clone()),
                address: entity.and_then(|e| e.address.clone()),
                id,
                amount: share,
            }
        })
        .collect();

    let unaddressed = payouts.iter().filter(|p| p.address.is_none()).count();
    if unaddressed > 0 {
        tracing::warn!(count = unaddressed, "payouts without an address");
    }
    tracing::info!(amount, recipients = payouts.len(), "distributed payout");

    Ok(payouts)
}

fn split(
    tree: &ResolvedTree,
    block_id: &str,
    amount: f64,
    shares: &mut BTreeMap<String, f64>,
    visited: &mut BTreeSet<String>,
) -> Result<()> {
    let Some(resolved) = tree.block(block_id) else {
        return Err(CircleError::NoRoot(block_id.to_string()));
    };
    if !visited.insert(block_id.to_string()) {
        return Err(CircleError::CycleDetected(resolved.block.name.clone()));
    }

    let block = &resolved.block;
    let grand_total = block.grand_total();
    if grand_total <= 0.0 {
        if amount > 0.0 {
            return Err(CircleError::NothingAllocated(block.name.clone()));
        }
        return Ok(());
    }

    for (dest, link) in block.destinations.iter().zip(&resolved.links) {
        let share = amount * block.total(dest) / grand_total;
        tracing::debug!(
            block = %block.name,
            destination = %block.destination_name(dest),
            pct = share / amount.max(f64::MIN_POSITIVE) * 100.0,
            share,
            "split"
        );

        match link {
            Destination::Block(child) => split(tree, child, share, shares, visited)?,
            Destination::Leaf(id) => *shares.entry(id.clone()).or_insert(0.0) += share,
        }
    }

    Ok(())
}

/// Sum of all payouts
pub fn total_paid(payouts: &[Payout]) -> f64 {
    payouts.iter().map(|p| p.amount).sum()
}
