// Entity Models - participants and their optional addresses
//
// Each entity has:
// - Stable identity (canonical slug) derived from its name
// - Optional external address, learned at most once per run
// - A per-run registry for normalization and lookups

pub mod address_book;
pub mod participant;

pub use address_book::AddressBook;
pub use participant::{canonicalize, AddressMerge, Entity, IdentityRegistry, LeafPolicy};
