//! Tessera Routing - Versioned range routing for sharded collections.
//!
//! This crate maps every key of a collection's shard key space to the chunk,
//! and therefore the shard, that owns it. Routing tables are immutable
//! snapshots: a refresh produces a new table that shares every unchanged
//! chunk with its predecessor, so readers holding an old snapshot are never
//! disturbed.
//!
//! # Design (`TigerStyle`)
//!
//! - **Copy-on-write snapshots**: Refresh cost scales with the diff, not the table
//! - **All-or-nothing updates**: A failed diff never yields a partial table
//! - **Fail fast**: Broken coverage on the query path panics
//! - **Explicit limits**: Chunk counts, diff sizes, and pending ranges are bounded

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod catalog;
mod chunk;
mod error;
mod ownership;
mod router;
mod routing_table;
mod view;

pub use catalog::{CatalogSnapshot, CatalogSource};
pub use chunk::{ChunkEntry, ChunkHistory};
pub use error::{
    BuildError, BuildResult, CatalogError, QueryError, RefreshError, RoutingError, UpdateError,
    UpdateResult,
};
pub use ownership::{OrphanRanges, OwnershipFilter};
pub use router::{CollectionRouter, RefreshOutcome, RefreshStats, RouterConfig};
pub use routing_table::RoutingTable;
pub use view::RoutingTableView;
