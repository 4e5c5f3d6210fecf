// 📇 Address Book - Optional name → address overlay
//
// Loaded from a two-column CSV (name,address). Names are canonicalized on the
// way in, so "Alice" in the overlay matches "ALICE" in the sheet.

use crate::entities::participant::canonicalize;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::btree_map::{self, BTreeMap};
use std::path::Path;

/// One row of the overlay CSV
#[derive(Debug, Deserialize)]
struct AddressRow {
    name: String,
    address: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressBook {
    /// canonical id → address
    addresses: BTreeMap<String, String>,
}

impl AddressBook {
    pub fn new() -> Self {
        AddressBook::default()
    }

    /// Load overlay from a `name,address` CSV file (header row required)
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open address file: {}", path.display()))?;

        let mut book = AddressBook::new();
        for (line_num, result) in rdr.deserialize().enumerate() {
            let row: AddressRow = result.with_context(|| {
                format!("Failed to parse line {} in {}", line_num + 2, path.display())
            })?;

            if row.address.is_empty() {
                continue;
            }

            book.insert(&row.name, &row.address).with_context(|| {
                format!("Invalid name on line {} in {}", line_num + 2, path.display())
            })?;
        }

        Ok(book)
    }

    /// Add an entry by display name; returns false when the id already had one
    pub fn insert(&mut self, name: &str, address: &str) -> crate::error::Result<bool> {
        let id = canonicalize(name)?;
        Ok(self.insert_id(&id, address))
    }

    /// Add an entry by canonical id, first value wins
    pub(crate) fn insert_id(&mut self, id: &str, address: &str) -> bool {
        match self.addresses.entry(id.to_string()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(address.trim().to_string());
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn address_for(&self, id: &str) -> Option<&str> {
        self.addresses.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.addresses.iter()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
