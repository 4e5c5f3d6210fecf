// Circle Cred - Core Library
// Multi-level allocation sheets → allocation trees → weighted graphs

pub mod error;
pub mod config;
pub mod entities;       // Participants + address overlay
pub mod grid;           // Raw cells, CSV grid source, tableize
pub mod period;
pub mod block;
pub mod extractor;      // One block out of a grid
pub mod resolver;       // Blocks → tree
pub mod graph;
pub mod compiler;       // Tree → weighted graph
pub mod distribution;   // Tree → payouts
pub mod ranking;
pub mod pipeline;
pub mod export;

// Re-export commonly used types
pub use error::{CircleError, Result};
pub use config::Config;
pub use entities::{
    canonicalize, AddressBook, AddressMerge, Entity, IdentityRegistry, LeafPolicy,
};
pub use grid::{
    load_gifts, tableize, write_grid_csv, CsvGridSource, Gift, Grid, GridSource, SheetValues,
};
pub use period::Period;
pub use block::{AllocationBlock, RowSpan};
pub use extractor::{extract_block, Extraction};
pub use resolver::{
    resolve_hierarchy, Destination, OrphanBlock, Resolution, ResolvedBlock, ResolvedTree,
};
pub use graph::{
    Addresser, Edge, EdgeAddress, EdgeKind, Node, NodeAddress, NodeKind, WeightedGraph,
};
pub use compiler::{GraphCompiler, WeightPolicy};
pub use distribution::{distribute, total_paid, Payout};
pub use ranking::{Identity, RankingEngine, RankingInput, Score};
pub use pipeline::{build_graph, process_sheet, ranking_input, ProcessedSheet};
pub use export::{write_edges_csv, write_json, write_json_file, write_nodes_csv, write_payouts_csv};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
