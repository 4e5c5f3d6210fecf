// 📤 Export - Write graphs and payouts for other tools
//
// CSV for spreadsheets and graph databases, JSON for the ranking engine.

use crate::distribution::Payout;
use crate::graph::WeightedGraph;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Serialize)]
struct NodeRow<'a> {
    address: &'a str,
    kind: &'a str,
    description: &'a str,
    timestamp_ms: Option<i64>,
}

#[derive(Serialize)]
struct EdgeRow<'a> {
    address: &'a str,
    kind: &'a str,
    src: &'a str,
    dst: &'a str,
    weight: f64,
    timestamp_ms: Option<i64>,
}

#[derive(Serialize)]
struct PayoutRow<'a> {
    name: &'a str,
    address: &'a str,
    amount: f64,
}

/// `address,kind,description,timestamp_ms`
pub fn write_nodes_csv(graph: &WeightedGraph, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create nodes file: {}", path.display()))?;

    for node in graph.nodes.values() {
        writer.serialize(NodeRow {
            address: node.address.as_str(),
            kind: node.kind.as_str(),
            description: &node.description,
            timestamp_ms: node.timestamp_ms,
        })?;
    }
    writer.flush()?;

    tracing::debug!(path = %path.display(), nodes = graph.node_count(), "wrote nodes");
    Ok(())
}

/// `address,kind,src,dst,weight,timestamp_ms`
pub fn write_edges_csv(graph: &WeightedGraph, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create edges file: {}", path.display()))?;

    for edge in graph.edges.values() {
        writer.serialize(EdgeRow {
            address: edge.address.as_str(),
            kind: edge.kind.as_str(),
            src: edge.src.as_str(),
            dst: edge.dst.as_str(),
            weight: edge.weight,
            timestamp_ms: edge.timestamp_ms,
        })?;
    }
    writer.flush()?;

    tracing::debug!(path = %path.display(), edges = graph.edge_count(), "wrote edges");
    Ok(())
}

/// `name,address,amount`; unknown addresses are left blank
pub fn write_payouts_csv<W: Write>(payouts: &[Payout], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    for payout in payouts {
        writer.serialize(PayoutRow {
            name: &payout.name,
            address: payout.address.as_deref().unwrap_or(""),
            amount: payout.amount,
        })?;
    }
    writer.flush().context("Failed to write payouts")?;

    Ok(())
}

/// Pretty-printed JSON of any serializable value
pub fn write_json<T: Serialize, W: Write>(value: &T, out: W) -> Result<()> {
    let mut out = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut out, value).context("Failed to serialize JSON")?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Same as `write_json`, to a file
pub fn write_json_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create JSON file: {}", path.display()))?;
    write_json(value, file)
}
