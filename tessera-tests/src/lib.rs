//! Tessera Tests - Property and scenario testing for Tessera routing.
//!
//! This crate contains the integration tests for Tessera. Tests drive
//! routing tables through long, seeded sequences of catalog changes and
//! check every resulting table against brute-force properties.
//!
//! ## Test Organization
//!
//! **Integration Tests** (`*_tests.rs`):
//! - `routing_table_tests`: Builds, diffs, and structural sharing
//! - `refresh_tests`: `CollectionRouter` against a simulated catalog
//! - `orphan_tests`: Orphan range enumeration and ownership queries
//!
//! **Support Modules**:
//! - `properties`: Property definitions (`Gap`, `LookupMismatch`, `OrphanMismatch`, etc.)
//! - `scenarios`: Chunk layouts, shard selectors, and seeds
//! - `simulated_catalog`: In-memory catalog applying splits, moves, and merges
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod simulated_catalog;

// Integration test modules.
#[cfg(test)]
mod orphan_tests;
#[cfg(test)]
mod routing_table_tests;
