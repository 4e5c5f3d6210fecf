// ⚠️ Error Taxonomy - Everything that can stop a processing run
//
// Orphan blocks are NOT errors: they are recorded on the Resolution and logged.
// NoBlockFound is the scan sentinel; the resolver swallows it, callers of
// extract_block see it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CircleError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CircleError {
    /// Name canonicalizes to an empty slug
    #[error("invalid name {0:?}: no letters or digits to build an id from")]
    InvalidName(String),

    /// Cell that cannot be read as a non-negative amount (0-indexed coordinates)
    #[error("malformed cell at row {row}, column {col}: {value:?}")]
    MalformedCell { row: usize, col: usize, value: String },

    /// Scan reached the end of the grid (or a header with no actor rows)
    #[error("no block found after row {0}")]
    NoBlockFound(usize),

    /// Header row with a block name but no destination columns
    #[error("block header at row {0} has no destination columns")]
    NoDestinations(usize),

    #[error("no root block found: the grid contains no blocks")]
    NoRootFound,

    #[error("destination {destination:?} of block {block:?} cannot be resolved: {reason}")]
    UnresolvedDestination {
        block: String,
        destination: String,
        reason: String,
    },

    #[error("block {0:?} appears more than once in the grid")]
    DuplicateBlock(String),

    /// A block listed as destination by more than one block (or the root listed at all)
    #[error("block {block:?} is a destination of both {first:?} and {second:?}")]
    SharedBlock {
        block: String,
        first: String,
        second: String,
    },

    #[error("block {block:?} lists the root block {root:?} as a destination")]
    RootAsDestination { root: String, block: String },

    #[error("unparsable period {0:?}: expected \"<Month> <YYYY>\"")]
    UnparsablePeriod(String),

    /// Two sheets of one graph resolve to the same period key
    #[error("sheets {first:?} and {second:?} both cover period {period}")]
    DuplicatePeriod {
        period: String,
        first: String,
        second: String,
    },

    #[error("tree has no root block {0:?}")]
    NoRoot(String),

    #[error("block {0:?} visited twice while compiling the graph")]
    CycleDetected(String),

    #[error("edge {0} emitted twice with different contents")]
    ConflictingEdge(String),

    #[error("edge {0} points at a node that is not in the graph")]
    DanglingEdge(String),

    #[error("block {0:?} has nothing allocated but receives a share")]
    NothingAllocated(String),

    #[error("cannot distribute {0}: amount must be a finite, non-negative number")]
    InvalidAmount(f64),
}

impl CircleError {
    /// True for the scan sentinel that marks normal end of extraction
    pub fn is_end_of_scan(&self) -> bool {
        matches!(self, CircleError::NoBlockFound(_))
    }
}
