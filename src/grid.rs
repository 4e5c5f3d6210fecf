// 🧮 Grid - The raw cell matrix a sheet provides
//
// A grid is an ordered list of rows, each an ordered list of cell strings.
// An empty row (zero cells, or only blank cells) separates blocks.
//
// The remote spreadsheet fetch is somebody else's job; this module only knows
// how to read a grid that was already exported to CSV.

use crate::error::{CircleError, Result};
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ============================================================================
// GRID
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Grid { rows }
    }

    /// Build a grid from string literals (handy for fixtures)
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Grid {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// A row is empty when it has no cells or only blank cells
    pub fn is_empty_row(&self, index: usize) -> bool {
        self.row(index).map_or(true, row_is_blank)
    }

    /// SHA-256 over every cell, for provenance of a processing run
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for row in &self.rows {
            for cell in row {
                hasher.update(cell.as_bytes());
                hasher.update([0x1f]);
            }
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }
}

fn row_is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

// ============================================================================
// CELL PARSING
// ============================================================================

/// Parse an allotment cell into a non-negative amount
///
/// - Blank → 0
/// - "1,250.5" → 1250.5 (commas only as thousands groups: "1,5" is malformed)
/// - Negative, NaN, infinite or non-numeric → MalformedCell
pub fn parse_amount(cell: &str, row: usize, col: usize) -> Result<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    let malformed = || CircleError::MalformedCell {
        row,
        col,
        value: cell.to_string(),
    };

    let cleaned = if trimmed.contains(',') {
        if !thousands_grouped().is_match(trimmed) {
            return Err(malformed());
        }
        trimmed.replace(',', "")
    } else {
        trimmed.to_string()
    };
    let value: f64 = cleaned.parse().map_err(|_| malformed())?;

    if !value.is_finite() || value < 0.0 {
        return Err(malformed());
    }

    // Collapse -0 into 0
    Ok(if value == 0.0 { 0.0 } else { value })
}

fn thousands_grouped() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{1,3}(,\d{3})+(\.\d+)?$").expect("thousands pattern is valid")
    })
}

// ============================================================================
// SHEET VALUES + SOURCES
// ============================================================================

/// What a grid source hands over: the A1 range label plus the cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetValues {
    /// e.g. `'March 2022'!A1:Q100`
    pub range_label: String,
    pub rows: Grid,
}

impl SheetValues {
    pub fn new(range_label: impl Into<String>, rows: Grid) -> Self {
        SheetValues {
            range_label: range_label.into(),
            rows,
        }
    }

    /// Sheet title from the range label
    ///
    /// `'March 2022'!A1:Q100` → `March 2022`, `March!A1` → `March`,
    /// `March 2022` → `March 2022`
    pub fn sheet_title(&self) -> &str {
        sheet_title(&self.range_label)
    }
}

pub fn sheet_title(range_label: &str) -> &str {
    let label = range_label.trim();

    if let Some(quoted) = label.strip_prefix('\'') {
        if let Some(end) = quoted.find('\'') {
            return &quoted[..end];
        }
    }

    match label.find('!') {
        Some(bang) => &label[..bang],
        None => label,
    }
}

/// Grid source - where a sheet's cells come from
///
/// Remote sources (Sheets API, GraphQL) live outside this crate; they only
/// need to produce SheetValues.
pub trait GridSource {
    fn fetch(&self) -> anyhow::Result<SheetValues>;
}

/// Reads a sheet exported as CSV. Range label defaults to the file stem.
pub struct CsvGridSource {
    path: PathBuf,
    range_label: Option<String>,
}

impl CsvGridSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvGridSource {
            path: path.into(),
            range_label: None,
        }
    }

    /// Builder pattern: override the range label
    pub fn with_range_label(mut self, label: impl Into<String>) -> Self {
        self.range_label = Some(label.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GridSource for CsvGridSource {
    fn fetch(&self) -> anyhow::Result<SheetValues> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open grid file: {}", self.path.display()))?;

        let mut rows = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!("Failed to parse CSV line {} in {}", line_num + 1, self.path.display())
            })?;

            let row: Vec<String> = record.iter().map(str::to_string).collect();
            rows.push(if row_is_blank(&row) { Vec::new() } else { row });
        }

        let range_label = match &self.range_label {
            Some(label) => label.clone(),
            None => self
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_string(),
        };

        Ok(SheetValues::new(range_label, Grid::new(rows)))
    }
}

// ============================================================================
// TABLEIZE
// ============================================================================

/// One gift from a sender to a recipient, as exported by the allocation app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gift {
    pub sender: String,
    pub recipient: String,
    pub tokens: f64,
}

/// Load `sender,recipient,tokens` rows from CSV
pub fn load_gifts(path: &Path) -> anyhow::Result<Vec<Gift>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open gifts file: {}", path.display()))?;

    let mut gifts = Vec::new();
    for (line_num, result) in rdr.deserialize().enumerate() {
        let gift: Gift = result.with_context(|| {
            format!("Failed to parse line {} in {}", line_num + 2, path.display())
        })?;
        gifts.push(gift);
    }

    Ok(gifts)
}

/// Lay a list of gifts out as one grid block
///
/// Header: circle name, sorted recipients, blank margin.
/// One row per sorted sender; missing gifts are blank cells.
/// Repeated sender/recipient pairs are summed.
pub fn tableize(circle_name: &str, gifts: &[Gift]) -> Grid {
    let mut table: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
    let mut recipients: BTreeSet<&str> = BTreeSet::new();

    for gift in gifts {
        let sender = gift.sender.trim();
        let recipient = gift.recipient.trim();
        *table
            .entry(sender)
            .or_default()
            .entry(recipient)
            .or_insert(0.0) += gift.tokens;
        recipients.insert(recipient);
    }

    let mut rows = Vec::with_capacity(table.len() + 1);

    let mut header = vec![circle_name.to_string()];
    header.extend(recipients.iter().map(|r| r.to_string()));
    header.push(String::new());
    rows.push(header);

    for (sender, dist) in &table {
        let mut row = vec![sender.to_string()];
        row.extend(recipients.iter().map(|recipient| {
            dist.get(recipient)
                .map(|tokens| tokens.to_string())
                .unwrap_or_default()
        }));
        row.push(String::new());
        rows.push(row);
    }

    Grid::new(rows)
}

/// Write a grid as CSV
pub fn write_grid_csv(grid: &Grid, path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to create grid file: {}", path.display()))?;

    for row in grid.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;

    Ok(())
}
