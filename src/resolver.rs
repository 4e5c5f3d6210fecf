// 🌳 Hierarchy Resolver - Turn a grid of blocks into one allocation tree
//
// Rules:
// - First block in the grid is the root
// - A later block is accepted only if an already accepted block lists it as a
//   destination (parents must come before children in the grid)
// - Anything else is an orphan: logged, recorded, left out of the tree
// - After the scan every destination becomes either a child block or a leaf
//   participant; each non-root block ends up with exactly one parent
//
// Blocks live in an arena keyed by id; links between them are ids.

use crate::block::{AllocationBlock, RowSpan};
use crate::entities::{Entity, IdentityRegistry};
use crate::error::{CircleError, Result};
use crate::extractor::extract_block;
use crate::grid::Grid;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// TREE TYPES
// ============================================================================

/// What a destination column turned out to be
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Destination {
    /// Another block in the tree (recursive distribution)
    Block(String),

    /// A participant entity
    Leaf(String),
}

impl Destination {
    pub fn id(&self) -> &str {
        match self {
            Destination::Block(id) | Destination::Leaf(id) => id,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Destination::Block(_))
    }
}

/// A block with its destinations linked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBlock {
    #[serde(flatten)]
    pub block: AllocationBlock,

    /// Parent block id (None for the root)
    pub parent: Option<String>,

    /// Same order as `block.destinations`
    pub links: Vec<Destination>,
}

impl ResolvedBlock {
    /// Child block ids in column order
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.links.iter().filter_map(|link| match link {
            Destination::Block(id) => Some(id.as_str()),
            Destination::Leaf(_) => None,
        })
    }
}

/// Root block plus every accepted block, cross-linked by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTree {
    pub root: String,
    pub blocks: BTreeMap<String, ResolvedBlock>,

    /// Every participant referenced by the tree (actors and leaves)
    pub entities: BTreeMap<String, Entity>,
}

impl ResolvedTree {
    pub fn root_block(&self) -> Option<&ResolvedBlock> {
        self.blocks.get(&self.root)
    }

    pub fn block(&self, id: &str) -> Option<&ResolvedBlock> {
        self.blocks.get(id)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Block ids in depth-first order from the root
    pub fn walk(&self) -> Vec<&str> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![self.root.as_str()];
        let mut seen = BTreeSet::new();

        while let Some(id) = stack.pop() {
            let Some(block) = self.blocks.get(id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            let children: Vec<&str> = block.children().collect();
            stack.extend(children.into_iter().rev());
        }

        order
    }

    /// Leaf participant ids, deduplicated
    pub fn leaves(&self) -> BTreeSet<&str> {
        self.blocks
            .values()
            .flat_map(|b| b.links.iter())
            .filter_map(|link| match link {
                Destination::Leaf(id) => Some(id.as_str()),
                Destination::Block(_) => None,
            })
            .collect()
    }

    /// Longest root-to-block chain (root alone = 1)
    pub fn depth(&self) -> usize {
        fn depth_of(tree: &ResolvedTree, id: &str, guard: usize) -> usize {
            match tree.blocks.get(id) {
                Some(block) if guard > 0 => {
                    1 + block
                        .children()
                        .map(|child| depth_of(tree, child, guard - 1))
                        .max()
                        .unwrap_or(0)
                }
                _ => 0,
            }
        }
        depth_of(self, &self.root, self.blocks.len())
    }
}

/// Block that could not be attached to the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanBlock {
    pub id: String,
    pub name: String,

    /// Name of the root at the time the orphan was seen
    pub root_name: String,
    pub rows: RowSpan,
}

/// Result of resolving a whole grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub tree: ResolvedTree,
    pub orphans: Vec<OrphanBlock>,
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Extract every block in the grid and link them into a tree
///
/// # Errors
/// * `NoRootFound` - grid has no blocks at all
/// * `DuplicateBlock` - an accepted block name appears twice
/// * `RootAsDestination` / `SharedBlock` - linking would break the tree shape
/// * `UnresolvedDestination` - destination names an orphaned block, or a leaf
///   the registry's leaf policy refuses
/// * anything `extract_block` raises except the end-of-scan sentinel
pub fn resolve_hierarchy(grid: &Grid, registry: &mut IdentityRegistry) -> Result<Resolution> {
    let mut accepted: Vec<AllocationBlock> = Vec::new();
    let mut accepted_ids: BTreeSet<String> = BTreeSet::new();
    let mut known_destinations: BTreeSet<String> = BTreeSet::new();
    let mut orphans: Vec<OrphanBlock> = Vec::new();
    let mut root: Option<(String, String)> = None;

    let mut start = 0;
    loop {
        let extraction = match extract_block(grid, start, registry) {
            Ok(extraction) => extraction,
            Err(err) if err.is_end_of_scan() => {
                warn_on_trailing_rows(grid, &err);
                break;
            }
            Err(err) => return Err(err),
        };
        start = extraction.end_row + 1;
        let block = extraction.block;

        let (root_id, root_name) = root.get_or_insert_with(|| (block.id.clone(), block.name.clone()));

        if accepted_ids.contains(&block.id) {
            return Err(CircleError::DuplicateBlock(block.name));
        }

        if block.id == *root_id || known_destinations.contains(&block.id) {
            known_destinations.extend(block.destinations.iter().cloned());
            accepted_ids.insert(block.id.clone());
            accepted.push(block);
        } else {
            tracing::warn!(
                block = %block.name,
                root = %root_name,
                row = block.rows.start,
                "block is not a destination of any accepted block, skipping"
            );
            orphans.push(OrphanBlock {
                id: block.id,
                name: block.name,
                root_name: root_name.clone(),
                rows: block.rows,
            });
        }
    }

    let (root_id, root_name) = root.ok_or(CircleError::NoRootFound)?;
    let tree = link_blocks(root_id, &root_name, accepted, &accepted_ids, &orphans, registry)?;

    tracing::info!(
        root = %root_name,
        blocks = tree.blocks.len(),
        participants = tree.entities.len(),
        orphans = orphans.len(),
        "resolved allocation tree"
    );

    Ok(Resolution { tree, orphans })
}

/// Substitute every destination with a child block or a leaf entity
fn link_blocks(
    root_id: String,
    root_name: &str,
    accepted: Vec<AllocationBlock>,
    accepted_ids: &BTreeSet<String>,
    orphans: &[OrphanBlock],
    registry: &mut IdentityRegistry,
) -> Result<ResolvedTree> {
    let orphan_ids: BTreeSet<&str> = orphans.iter().map(|o| o.id.as_str()).collect();

    // child id → parent block (id, name)
    let mut parents: BTreeMap<String, (String, String)> = BTreeMap::new();
    let mut linked: Vec<(AllocationBlock, Vec<Destination>)> = Vec::with_capacity(accepted.len());
    let mut referenced: BTreeSet<String> = BTreeSet::new();

    for block in accepted {
        let mut links = Vec::with_capacity(block.destinations.len());

        for dest in &block.destinations {
            let dest_name = block.destination_name(dest);

            if accepted_ids.contains(dest) {
                if *dest == root_id {
                    return Err(CircleError::RootAsDestination {
                        root: root_name.to_string(),
                        block: block.name.clone(),
                    });
                }
                if let Some((parent_id, parent_name)) = parents.get(dest) {
                    if *parent_id != block.id {
                        return Err(CircleError::SharedBlock {
                            block: dest_name.to_string(),
                            first: parent_name.clone(),
                            second: block.name.clone(),
                        });
                    }
                }
                parents.insert(dest.clone(), (block.id.clone(), block.name.clone()));
                links.push(Destination::Block(dest.clone()));
                continue;
            }

            if orphan_ids.contains(dest.as_str()) {
                return Err(CircleError::UnresolvedDestination {
                    block: block.name.clone(),
                    destination: dest_name.to_string(),
                    reason: "names a block that was skipped as an orphan \
                             (is it placed above its parent?)"
                        .to_string(),
                });
            }

            if !registry.accepts_leaf(dest_name)? {
                return Err(CircleError::UnresolvedDestination {
                    block: block.name.clone(),
                    destination: dest_name.to_string(),
                    reason: "not a block and not a known participant".to_string(),
                });
            }

            let leaf = registry.resolve(dest_name)?.id.clone();
            referenced.insert(leaf.clone());
            links.push(Destination::Leaf(leaf));
        }

        referenced.extend(block.actors.iter().cloned());
        linked.push((block, links));
    }

    let blocks = linked
        .into_iter()
        .map(|(block, links)| {
            let parent = parents.get(&block.id).map(|(id, _)| id.clone());
            (block.id.clone(), ResolvedBlock { block, parent, links })
        })
        .collect();

    let entities = referenced
        .iter()
        .filter_map(|id| registry.get(id).cloned())
        .map(|entity| (entity.id.clone(), entity))
        .collect();

    Ok(ResolvedTree {
        root: root_id,
        blocks,
        entities,
    })
}

/// The scan stops at the first header without actor rows; say so if real
/// content is left below it
fn warn_on_trailing_rows(grid: &Grid, err: &CircleError) {
    let CircleError::NoBlockFound(row) = err else {
        return;
    };
    let remaining = (row + 1..grid.len())
        .filter(|r| !grid.is_empty_row(*r))
        .count();
    if remaining > 0 {
        tracing::warn!(
            row = *row,
            remaining_rows = remaining,
            "scan stopped at a header with no actor rows; rows below it were not read"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AddressBook, LeafPolicy};

    fn resolve(rows: Vec<Vec<&str>>) -> Result<Resolution> {
        let mut registry = IdentityRegistry::new();
        resolve_hierarchy(&Grid::from_rows(rows), &mut registry)
    }

    fn two_level() -> Vec<Vec<&'static str>> {
        vec![
            vec!["Top", "Builders", "Writers", "Zed", ""],
            vec!["alice", "5", "3", "2", ""],
            vec!["bob", "1", "1", "0", ""],
            vec![],
            vec!["Builders", "carol", "dave", ""],
            vec!["carol", "0", "4", ""],
            vec!["dave", "6", "0", ""],
            vec![],
            vec!["Writers", "erin", "alice", ""],
            vec!["erin", "0", "2", ""],
        ]
    }

    #[test]
    fn test_single_block_has_no_children() {
        let resolution = resolve(vec![
            vec!["Top", "A", "B", ""],
            vec!["alice", "3", "1", ""],
            vec!["bob", "0", "2", ""],
        ])
        .unwrap();
        let tree = resolution.tree;

        assert_eq!(tree.root, "top");
        assert_eq!(tree.blocks.len(), 1);
        let root = tree.root_block().unwrap();
        assert_eq!(root.parent, None);
        assert_eq!(root.children().count(), 0);
        assert_eq!(
            root.links,
            vec![Destination::Leaf("a".into()), Destination::Leaf("b".into())]
        );
        assert_eq!(tree.leaves().len(), 2);
        assert_eq!(tree.depth(), 1);
        assert!(resolution.orphans.is_empty());
    }

    #[test]
    fn test_two_level_tree() {
        let tree = resolve(two_level()).unwrap().tree;

        assert_eq!(tree.blocks.len(), 3);
        let root = tree.root_block().unwrap();
        assert_eq!(root.children().collect::<Vec<_>>(), ["builders", "writers"]);
        assert_eq!(root.links[2], Destination::Leaf("zed".into()));

        let builders = tree.block("builders").unwrap();
        assert_eq!(builders.parent.as_deref(), Some("top"));
        assert_eq!(builders.block.total("carol"), 6.0);

        // alice is both an actor in Top and a leaf in Writers: one entity
        assert!(tree.leaves().contains("alice"));
        assert_eq!(tree.entities.len(), 6);
        assert_eq!(tree.walk(), ["top", "builders", "writers"]);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_orphan_block_is_skipped() {
        let mut rows = two_level();
        rows.push(vec![]);
        rows.push(vec!["Marketing", "frank", ""]);
        rows.push(vec!["gina", "1", ""]);

        let resolution = resolve(rows).unwrap();

        assert_eq!(resolution.tree.blocks.len(), 3);
        assert_eq!(resolution.orphans.len(), 1);
        let orphan = &resolution.orphans[0];
        assert_eq!(orphan.name, "Marketing");
        assert_eq!(orphan.root_name, "Top");
        assert_eq!(orphan.rows, RowSpan { start: 11, end: 12 });
        // orphan actors do not leak into the tree's participants
        assert!(resolution.tree.entity("gina").is_none());
    }

    #[test]
    fn test_grandchild_accepted_through_child() {
        let resolution = resolve(vec![
            vec!["Top", "Guild", ""],
            vec!["alice", "1", ""],
            vec![],
            vec!["Guild", "Squad", "bob", ""],
            vec!["bob", "2", "1", ""],
            vec![],
            vec!["Squad", "carol", ""],
            vec!["bob", "4", ""],
        ])
        .unwrap();

        let tree = resolution.tree;
        assert_eq!(tree.block("squad").unwrap().parent.as_deref(), Some("guild"));
        assert_eq!(tree.walk(), ["top", "guild", "squad"]);
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn test_child_above_parent_is_unresolved() {
        let result = resolve(vec![
            vec!["Top", "Guild", ""],
            vec!["alice", "1", ""],
            vec![],
            vec!["Squad", "carol", ""],
            vec!["bob", "4", ""],
            vec![],
            vec!["Guild", "Squad", ""],
            vec!["bob", "2", ""],
        ]);

        assert!(matches!(
            result,
            Err(CircleError::UnresolvedDestination { ref destination, .. }) if destination == "Squad"
        ));
    }

    #[test]
    fn test_known_only_leaves() {
        let mut book = AddressBook::new();
        book.insert("zed", "0x2ed").unwrap();
        let grid = Grid::from_rows(two_level());

        let mut strict = IdentityRegistry::with_overlay(&book, LeafPolicy::KnownOnly);
        // carol, dave, erin, alice are actors; zed is in the overlay
        let tree = resolve_hierarchy(&grid, &mut strict).unwrap().tree;
        assert_eq!(tree.entity("zed").unwrap().address.as_deref(), Some("0x2ed"));

        let mut rows = two_level();
        rows[8] = vec!["Writers", "erin", "stranger", ""];
        let mut strict = IdentityRegistry::with_overlay(&book, LeafPolicy::KnownOnly);
        let result = resolve_hierarchy(&Grid::from_rows(rows), &mut strict);
        assert!(matches!(
            result,
            Err(CircleError::UnresolvedDestination { ref destination, .. }) if destination == "stranger"
        ));
    }

    #[test]
    fn test_empty_grid_has_no_root() {
        assert_eq!(resolve(vec![]), Err(CircleError::NoRootFound));
        assert_eq!(resolve(vec![vec![], vec![""]]), Err(CircleError::NoRootFound));
    }

    #[test]
    fn test_duplicate_block() {
        let result = resolve(vec![
            vec!["Top", "Guild", ""],
            vec!["alice", "1", ""],
            vec![],
            vec!["Guild", "bob", ""],
            vec!["alice", "1", ""],
            vec![],
            vec!["guild", "carol", ""],
            vec!["alice", "1", ""],
        ]);
        assert_eq!(result, Err(CircleError::DuplicateBlock("guild".to_string())));
    }

    #[test]
    fn test_shared_and_cyclic_blocks_rejected() {
        let shared = resolve(vec![
            vec!["Top", "A", "B", ""],
            vec!["alice", "1", "1", ""],
            vec![],
            vec!["A", "C", ""],
            vec!["bob", "1", ""],
            vec![],
            vec!["B", "C", ""],
            vec!["bob", "1", ""],
            vec![],
            vec!["C", "dave", ""],
            vec!["bob", "1", ""],
        ]);
        assert!(matches!(shared, Err(CircleError::SharedBlock { .. })));

        let back_to_root = resolve(vec![
            vec!["Top", "A", ""],
            vec!["alice", "1", ""],
            vec![],
            vec!["A", "Top", ""],
            vec!["bob", "1", ""],
        ]);
        assert_eq!(
            back_to_root,
            Err(CircleError::RootAsDestination {
                root: "Top".to_string(),
                block: "A".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_cell_propagates() {
        let result = resolve(vec![
            vec!["Top", "A", ""],
            vec!["alice", "1", ""],
            vec![],
            vec!["A", "bob", ""],
            vec!["carol", "many", ""],
        ]);
        assert!(matches!(result, Err(CircleError::MalformedCell { row: 4, col: 1, .. })));
    }

    #[test]
    fn test_scan_stops_at_header_without_actors() {
        let resolution = resolve(vec![
            vec!["Top", "A", ""],
            vec!["alice", "1", ""],
            vec![],
            vec!["Notes", "x", ""],
            vec![],
            vec!["A", "bob", ""],
            vec!["carol", "1", ""],
        ])
        .unwrap();

        // "A" comes after the actorless header and is never read
        assert_eq!(resolution.tree.blocks.len(), 1);
        assert_eq!(
            resolution.tree.root_block().unwrap().links,
            vec![Destination::Leaf("a".into())]
        );
    }

    #[test]
    fn test_tree_serializes_without_cycles() {
        let tree = resolve(two_level()).unwrap().tree;
        let json = serde_json::to_string(&tree).unwrap();
        let back: ResolvedTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        assert!(json.contains("\"type\":\"block\""));
    }
}
