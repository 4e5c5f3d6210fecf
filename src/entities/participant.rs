// 👤 Participant Entity - Stable slug identity + address metadata
//
// "Surface spelling is a VALUE, the canonical slug is IDENTITY"
//
// Problem solved:
// - "Alice Smith", "alice smith", "Alice-Smith!" → All same entity
// - Block names and destination columns share the same id space
// - One registry per processing run keeps unrelated sheets from colliding

use crate::entities::address_book::AddressBook;
use crate::error::{CircleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// CANONICALIZATION
// ============================================================================

/// Turn a free-text name into a `[a-z0-9-]` slug
///
/// - ASCII letters are lowercased, digits kept
/// - Any run of other characters becomes a single `-`
/// - Non-ASCII letters/digits are spelled `u--` + hex code point. ASCII input
///   never yields `--`, so "José", "Jose" and "Jos U00E9" stay distinct
/// - Leading and trailing dashes are dropped
///
/// Example: "  Alice Smith (ops) " → "alice-smith-ops"
pub fn canonicalize(name: &str) -> Result<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                if !slug.is_empty() {
                    slug.push('-');
                }
                slug.push_str(&format!("u--{:04x}", lower as u32));
            }
            pending_dash = true;
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        return Err(CircleError::InvalidName(name.to_string()));
    }

    Ok(slug)
}

// ============================================================================
// ENTITY
// ============================================================================

/// A named participant (actor or leaf destination)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical slug - never changes for the lifetime of a run
    pub id: String,

    /// First surface spelling seen for this id
    pub name: String,

    /// External address (e.g. an Ethereum address), filled in at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Entity {
    pub fn new(id: String, name: String) -> Self {
        Entity {
            id,
            name,
            address: None,
        }
    }
}

/// Outcome of merging an address into the registry
#[derive(Debug, Clone, PartialEq)]
pub enum AddressMerge {
    /// Address was unset and is now set
    Set,

    /// Same address was already recorded
    Unchanged,

    /// A different address is already recorded; the first one is kept
    Conflict { kept: String, rejected: String },

    /// Blank address, nothing to merge
    Ignored,

    /// No entity with that id in this run
    UnknownEntity,
}

/// Whether a leaf destination may introduce a participant nobody has seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeafPolicy {
    /// Any valid name becomes a leaf entity
    #[default]
    Open,

    /// Leaf must already be known: an actor somewhere in the sheet, or listed
    /// in the address overlay
    KnownOnly,
}

// ============================================================================
// IDENTITY REGISTRY
// ============================================================================

/// Registry of all entities seen during one processing run
///
/// Append-only: entities are created lazily by `resolve` and never removed.
/// Create a fresh one per sheet/period.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    entities: BTreeMap<String, Entity>,

    /// Addresses waiting for entities that have not been seen yet
    overlay: AddressBook,

    leaf_policy: LeafPolicy,
}

impl IdentityRegistry {
    /// Create new empty registry (open leaf policy, no overlay)
    pub fn new() -> Self {
        IdentityRegistry::default()
    }

    /// Create registry that fills in addresses from an overlay as entities appear
    pub fn with_overlay(overlay: &AddressBook, leaf_policy: LeafPolicy) -> Self {
        let mut registry = IdentityRegistry {
            leaf_policy,
            ..IdentityRegistry::default()
        };
        registry.merge_overlay(overlay);
        registry
    }

    pub fn leaf_policy(&self) -> LeafPolicy {
        self.leaf_policy
    }

    /// Look up or create the entity for a name
    ///
    /// Names that canonicalize identically return the same entry.
    pub fn resolve(&mut self, name: &str) -> Result<&Entity> {
        let id = canonicalize(name)?;
        let overlay = &self.overlay;

        let entity = self.entities.entry(id).or_insert_with_key(|id| {
            let mut entity = Entity::new(id.clone(), name.trim().to_string());
            entity.address = overlay.address_for(id).map(str::to_string);
            entity
        });

        Ok(entity)
    }

    /// Check whether a leaf destination name is acceptable under the leaf policy
    pub fn accepts_leaf(&self, name: &str) -> Result<bool> {
        let id = canonicalize(name)?;
        Ok(match self.leaf_policy {
            LeafPolicy::Open => true,
            LeafPolicy::KnownOnly => {
                self.entities.contains_key(&id) || self.overlay.address_for(&id).is_some()
            }
        })
    }

    /// Set the address of an entity, first value wins
    pub fn attach_address(&mut self, id: &str, address: &str) -> AddressMerge {
        let address = address.trim();
        if address.is_empty() {
            return AddressMerge::Ignored;
        }

        let Some(entity) = self.entities.get_mut(id) else {
            return AddressMerge::UnknownEntity;
        };

        if let Some(existing) = &entity.address {
            if existing == address {
                return AddressMerge::Unchanged;
            }
            tracing::warn!(
                entity = %id,
                kept = %existing,
                rejected = %address,
                "conflicting address ignored, keeping the first one"
            );
            return AddressMerge::Conflict {
                kept: existing.clone(),
                rejected: address.to_string(),
            };
        }

        entity.address = Some(address.to_string());
        AddressMerge::Set
    }

    /// Merge an address overlay: known entities get their address now, the
    /// rest is remembered for entities created later
    pub fn merge_overlay(&mut self, overlay: &AddressBook) {
        for (id, address) in overlay.iter() {
            if self.entities.contains_key(id) {
                self.attach_address(id, address);
            }
            self.overlay.insert_id(id, address);
        }
    }

    /// Find entity by canonical id
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// All entities, ordered by id
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
