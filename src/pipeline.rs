// 🔄 Pipeline - One sheet per period, many periods per graph
//
// process_sheet: title → period, fresh registry, resolve
// build_graph:   compile every processed sheet into one union graph
//
// Sheets are compiled in the order given; node and edge insertion is
// idempotent so the order only matters for which conflict is reported first.

use crate::compiler::GraphCompiler;
use crate::entities::{AddressBook, IdentityRegistry, LeafPolicy};
use crate::error::{CircleError, Result};
use crate::graph::WeightedGraph;
use crate::grid::SheetValues;
use crate::period::Period;
use crate::ranking::RankingInput;
use crate::resolver::{resolve_hierarchy, OrphanBlock, ResolvedTree};
use std::collections::BTreeMap;

/// Everything one processing run produced
#[derive(Debug)]
pub struct ProcessedSheet {
    /// Sheet title taken from the range label
    pub title: String,
    pub period: Period,

    /// sha256 of the grid cells
    pub fingerprint: String,
    pub tree: ResolvedTree,
    pub orphans: Vec<OrphanBlock>,

    /// Registry the run used; holds every name seen, orphans' actors included
    pub registry: IdentityRegistry,
}

/// Run one sheet end to end with a fresh registry
///
/// # Errors
/// * `UnparsablePeriod` - title is not "<Month> <YYYY>"
/// * anything `resolve_hierarchy` raises
pub fn process_sheet(
    values: &SheetValues,
    overlay: &AddressBook,
    leaf_policy: LeafPolicy,
) -> Result<ProcessedSheet> {
    let title = values.sheet_title().to_string();
    let period = Period::parse(&title)?;

    let mut registry = IdentityRegistry::with_overlay(overlay, leaf_policy);
    let resolution = resolve_hierarchy(&values.rows, &mut registry)?;

    tracing::info!(
        sheet = %title,
        period = %period,
        blocks = resolution.tree.blocks.len(),
        orphans = resolution.orphans.len(),
        "processed sheet"
    );

    Ok(ProcessedSheet {
        title,
        period,
        fingerprint: values.rows.fingerprint(),
        tree: resolution.tree,
        orphans: resolution.orphans,
        registry,
    })
}

/// Compile every sheet into one graph, namespaced by period
///
/// # Errors
/// * `DuplicatePeriod` - two sheets share a period key, so their circles and
///   edges would land on the same addresses
/// * anything `GraphCompiler::compile_into` raises
pub fn build_graph(sheets: &[ProcessedSheet], compiler: &GraphCompiler) -> Result<WeightedGraph> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for sheet in sheets {
        if let Some(first) = seen.insert(sheet.period.key(), &sheet.title) {
            return Err(CircleError::DuplicatePeriod {
                period: sheet.period.key(),
                first: first.to_string(),
                second: sheet.title.clone(),
            });
        }
    }

    let mut graph = WeightedGraph::new();
    for sheet in sheets {
        compiler.compile_into(&mut graph, &sheet.tree, Some(&sheet.period))?;
    }

    tracing::info!(
        sheets = sheets.len(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "built union graph"
    );

    Ok(graph)
}

/// Union graph plus identity proposals for the ranking engine
pub fn ranking_input(
    sheets: &[ProcessedSheet],
    compiler: &GraphCompiler,
    plugin: &str,
) -> Result<RankingInput> {
    let graph = build_graph(sheets, compiler)?;
    Ok(RankingInput::new(
        graph,
        sheets.iter().map(|sheet| &sheet.tree),
        compiler.addresser(),
        plugin,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::grid::Grid;

    fn sheet(label: &str, rows: Vec<Vec<&str>>) -> SheetValues {
        SheetValues::new(label, Grid::from_rows(rows))
    }

    fn march() -> SheetValues {
        sheet(
            "'March 2022'!A1:Z100",
            vec![
                vec!["Top", "Builders", "Zed", ""],
                vec!["alice", "6", "2", ""],
                vec![],
                vec!["Builders", "carol", "dave", ""],
                vec!["carol", "0", "3", ""],
                vec!["dave", "1", "0", ""],
                vec![],
                vec!["Marketing", "gina", ""],
                vec!["hank", "1", ""],
            ],
        )
    }

    #[test]
    fn test_process_sheet() {
        let mut overlay = AddressBook::new();
        overlay.insert("Zed", "0xzed").unwrap();

        let processed = process_sheet(&march(), &overlay, LeafPolicy::Open).unwrap();

        assert_eq!(processed.title, "March 2022");
        assert_eq!(processed.period.key(), "2022-03");
        assert_eq!(processed.fingerprint.len(), 64);
        assert_eq!(processed.tree.root, "top");
        assert_eq!(processed.orphans.len(), 1);
        assert_eq!(processed.orphans[0].name, "Marketing");
        assert_eq!(
            processed.tree.entity("zed").and_then(|e| e.address.as_deref()),
            Some("0xzed")
        );
        // orphan actors were seen but are not part of the tree
        assert!(processed.registry.get("hank").is_some());
        assert!(processed.tree.entity("hank").is_none());
    }

    #[test]
    fn test_unparsable_title() {
        let values = sheet("Sheet1!A1:B2", vec![vec!["Top", "A", ""], vec!["amy", "1", ""]]);
        assert!(matches!(
            process_sheet(&values, &AddressBook::new(), LeafPolicy::Open),
            Err(CircleError::UnparsablePeriod(_))
        ));
    }

    #[test]
    fn test_build_graph_over_two_periods() {
        let april = sheet(
            "April 2022",
            vec![vec!["Top", "Zed", "Amy", ""], vec!["alice", "1", "1", ""]],
        );
        let sheets = vec![
            process_sheet(&march(), &AddressBook::new(), LeafPolicy::Open).unwrap(),
            process_sheet(&april, &AddressBook::new(), LeafPolicy::Open).unwrap(),
        ];

        let compiler = GraphCompiler::default();
        let input = ranking_input(&sheets, &compiler, "Multilevel-Coordinape").unwrap();

        assert_eq!(input.graph.nodes_of_kind(NodeKind::Epoch).count(), 2);
        // zed appears in both months but has one node
        let zed = compiler.addresser().participant("zed");
        assert_eq!(input.graph.in_edges(&zed).count(), 2);

        let names: Vec<&str> = input.identities.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["alice", "amy", "carol", "dave", "zed"]);
    }

    #[test]
    fn test_build_graph_rejects_two_sheets_for_one_period() {
        let revised = sheet(
            "March 2022 (revised)!A1:Z100",
            vec![vec!["Top", "Zed", ""], vec!["alice", "5", ""]],
        );
        let sheets = vec![
            process_sheet(&march(), &AddressBook::new(), LeafPolicy::Open).unwrap(),
            process_sheet(&revised, &AddressBook::new(), LeafPolicy::Open).unwrap(),
        ];

        let result = build_graph(&sheets, &GraphCompiler::default());

        assert_eq!(
            result,
            Err(CircleError::DuplicatePeriod {
                period: "2022-03".to_string(),
                first: "March 2022".to_string(),
                second: "March 2022 (revised)".to_string(),
            })
        );
    }
}
