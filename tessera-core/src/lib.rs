//! Tessera Core - Strongly-typed identifiers and key-space types for Tessera.
//!
//! This crate provides the vocabulary shared by every Tessera component:
//! shard and epoch identifiers, the ordered shard key space, half-open chunk
//! ranges, chunk versions, and configuration limits. It does NOT contain the
//! routing index itself; that lives in `tessera-routing`.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up `ShardId` with `CollectionEpoch`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod key;
mod limits;
mod types;
mod version;

pub use error::{Error, Result};
pub use key::{ChunkRange, RangeBound, ShardKey, ShardKeyPattern};
pub use limits::{
    Limits, CHUNKS_PER_COLLECTION_MAX, DIFF_ENTRIES_MAX, PENDING_INCOMING_RANGES_MAX,
};
pub use types::{CollectionEpoch, LogicalTime, ShardId};
pub use version::ChunkVersion;
