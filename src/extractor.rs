// 🔍 Block Extractor - Pull one allocation matrix out of a sparse grid
//
// Layout of a block:
//
//   Top     | Guild A | Guild B | (margin)
//   alice   |    3    |    1    |
//   bob     |    0    |    2    |
//   <empty row or end of grid>
//
// The header's last cell marks the margin column. For padded CSV exports it
// is the first trailing blank cell, or the last label when that label heads
// the row totals. Actor rows must be blank past the margin.
// Each call is a fresh scan from `start`; the caller keeps the cursor.

use crate::block::{AllocationBlock, RowSpan};
use crate::entities::{canonicalize, IdentityRegistry};
use crate::error::{CircleError, Result};
use crate::grid::{parse_amount, Grid};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// A parsed block and the rows it consumed
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub block: AllocationBlock,

    /// Header row
    pub start_row: usize,

    /// Last actor row (inclusive)
    pub end_row: usize,
}

/// Scan forward from `start` and parse the first block found
///
/// Actor names are resolved through the registry; destination and block
/// names are only canonicalized (the resolver decides what they become).
///
/// # Errors
/// * `NoBlockFound` - end of grid, or a header with no actor rows under it
/// * `NoDestinations` - header with nothing between name and margin
/// * `InvalidName` - block, destination or actor name with no letters/digits
/// * `MalformedCell` - allotment that is not a non-negative number
pub fn extract_block(
    grid: &Grid,
    start: usize,
    registry: &mut IdentityRegistry,
) -> Result<Extraction> {
    let mut header_row = start;
    while header_row < grid.len() && grid.is_empty_row(header_row) {
        header_row += 1;
    }

    let Some(header) = grid.row(header_row) else {
        return Err(CircleError::NoBlockFound(start));
    };

    let mut end_row = header_row;
    while end_row + 1 < grid.len() && !grid.is_empty_row(end_row + 1) {
        end_row += 1;
    }

    if end_row == header_row {
        return Err(CircleError::NoBlockFound(header_row));
    }

    // ------------------------------------------------------------------------
    // Header: name | destinations... | margin
    // ------------------------------------------------------------------------
    let name = header[0].trim().to_string();
    let id = canonicalize(&name)?;

    // Without trailing blanks the last cell is the margin. Padded exports end
    // the header with blanks: the first one is the margin, unless the last
    // label heads a column of row totals.
    let last_filled = header
        .iter()
        .rposition(|cell| !cell.trim().is_empty())
        .unwrap_or(0);
    let padded = last_filled + 1 < header.len();
    let margin_col = if padded && !is_totals_column(grid, header_row + 1..=end_row, last_filled) {
        last_filled + 1
    } else {
        last_filled
    };
    if margin_col <= 1 {
        return Err(CircleError::NoDestinations(header_row));
    }

    // Column position → destination id (repeated columns share an id)
    let mut column_ids = Vec::with_capacity(margin_col - 1);
    let mut destinations: Vec<String> = Vec::new();
    let mut destination_names = BTreeMap::new();

    for cell in &header[1..margin_col] {
        let dest_id = canonicalize(cell)?;
        if !destination_names.contains_key(&dest_id) {
            destination_names.insert(dest_id.clone(), cell.trim().to_string());
            destinations.push(dest_id.clone());
        }
        column_ids.push(dest_id);
    }

    // ------------------------------------------------------------------------
    // Actor rows: actor | amounts... | margin | (must be blank)
    // ------------------------------------------------------------------------
    let mut actors: Vec<String> = Vec::new();
    let mut allotments: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for row_index in header_row + 1..=end_row {
        let row = grid.row(row_index).unwrap_or_default();

        let actor = registry.resolve(&row[0])?.id.clone();
        if !actors.contains(&actor) {
            actors.push(actor.clone());
        }

        for (col, cell) in row.iter().enumerate().skip(1) {
            if col < margin_col {
                let amount = parse_amount(cell, row_index, col)?;
                if amount > 0.0 {
                    *allotments
                        .entry(column_ids[col - 1].clone())
                        .or_default()
                        .entry(actor.clone())
                        .or_insert(0.0) += amount;
                }
            } else if col > margin_col && !cell.trim().is_empty() {
                return Err(CircleError::MalformedCell {
                    row: row_index,
                    col,
                    value: cell.clone(),
                });
            }
        }
    }

    let totals = destinations
        .iter()
        .map(|d| {
            let sum = allotments
                .get(d)
                .map(|by_actor| by_actor.values().sum::<f64>())
                .unwrap_or(0.0);
            (d.clone(), sum)
        })
        .collect();

    tracing::debug!(
        block = %name,
        start_row = header_row,
        end_row,
        actors = actors.len(),
        destinations = destinations.len(),
        "extracted block"
    );

    Ok(Extraction {
        block: AllocationBlock {
            id,
            name,
            actors,
            destinations,
            destination_names,
            allotments,
            totals,
            rows: RowSpan {
                start: header_row,
                end: end_row,
            },
        },
        start_row: header_row,
        end_row,
    })
}

/// A labelled margin ("Total") in a padded header
///
/// The column is the block's widest filled column, every actor row holds its
/// own sum there (blank when the row is empty), and at least one of those
/// sums adds up two or more allotments.
fn is_totals_column(grid: &Grid, actor_rows: RangeInclusive<usize>, col: usize) -> bool {
    if col <= 1 {
        return false;
    }

    let mut summed_several = false;
    for index in actor_rows {
        let row = grid.row(index).unwrap_or_default();
        if row.iter().skip(col + 1).any(|cell| !cell.trim().is_empty()) {
            return false;
        }

        let amounts: Result<Vec<f64>> = (1..col)
            .map(|c| parse_amount(row.get(c).map_or("", String::as_str), index, c))
            .collect();
        let Ok(amounts) = amounts else {
            return false;
        };
        let Ok(total) = parse_amount(row.get(col).map_or("", String::as_str), index, col) else {
            return false;
        };

        let sum: f64 = amounts.iter().sum();
        if (total - sum).abs() > 1e-9 * sum.max(1.0) {
            return false;
        }
        summed_several |= amounts.iter().filter(|a| **a > 0.0).count() >= 2;
    }

    summed_several
}
