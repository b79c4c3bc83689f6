//! Catalog source - where routing metadata comes from.
//!
//! The routing layer never talks to the config servers directly. A
//! [`CatalogSource`] hands it either the complete chunk list or the chunks
//! changed since a known collection version, and the
//! [`crate::CollectionRouter`] decides how to fold them into a table.

use std::sync::Arc;

use tessera_core::{ChunkVersion, CollectionEpoch, ShardKeyPattern};

use crate::chunk::ChunkEntry;
use crate::error::CatalogError;

/// The complete routing metadata of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// The collection's current incarnation.
    pub epoch: CollectionEpoch,
    /// How document keys map onto the key space.
    pub key_pattern: ShardKeyPattern,
    /// Every chunk of the collection, in any order.
    pub chunks: Vec<ChunkEntry>,
}

/// Supplier of chunk metadata for one collection.
pub trait CatalogSource {
    /// Fetches the complete chunk list.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the catalog cannot be read.
    fn fetch_full_chunk_list(&self) -> Result<CatalogSnapshot, CatalogError>;

    /// Fetches every chunk whose version is newer than `since`.
    ///
    /// An empty result means nothing changed. If the collection was
    /// recreated, the returned chunks carry the new epoch.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the catalog cannot be read.
    fn fetch_diff_since(&self, since: ChunkVersion) -> Result<Vec<ChunkEntry>, CatalogError>;
}

impl<T: CatalogSource + ?Sized> CatalogSource for Arc<T> {
    fn fetch_full_chunk_list(&self) -> Result<CatalogSnapshot, CatalogError> {
        (**self).fetch_full_chunk_list()
    }

    fn fetch_diff_since(&self, since: ChunkVersion) -> Result<Vec<ChunkEntry>, CatalogError> {
        (**self).fetch_diff_since(since)
    }
}
