//! Query view over a routing table snapshot.
//!
//! A view pairs a shared snapshot with an optional read time. Without a read
//! time, queries answer with each chunk's current owner. With one, they
//! answer with the owner recorded in the chunk's placement history at that
//! time, which lets a reader at an older cluster time route consistently
//! after chunks have since moved.

use std::collections::BTreeSet;
use std::sync::Arc;

use tessera_core::{ChunkVersion, LogicalTime, RangeBound, ShardId};

use crate::chunk::ChunkEntry;
use crate::error::QueryError;
use crate::routing_table::RoutingTable;

/// A routing table snapshot plus an optional read-time bound.
///
/// Cloning a view is cheap; it shares the snapshot.
#[derive(Debug, Clone)]
pub struct RoutingTableView {
    table: Arc<RoutingTable>,
    read_at: Option<LogicalTime>,
}

impl RoutingTableView {
    /// Creates a view that answers with current owners.
    #[must_use]
    pub const fn new(table: Arc<RoutingTable>) -> Self {
        Self {
            table,
            read_at: None,
        }
    }

    /// Creates a view that answers as of `read_at`.
    #[must_use]
    pub const fn at(table: Arc<RoutingTable>, read_at: LogicalTime) -> Self {
        Self {
            table,
            read_at: Some(read_at),
        }
    }

    /// Returns the underlying snapshot.
    #[must_use]
    pub const fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Returns the read-time bound, if any.
    #[must_use]
    pub const fn read_at(&self) -> Option<LogicalTime> {
        self.read_at
    }

    /// Returns the chunk whose range contains `key`.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot's coverage invariant is broken, or if `key` is
    /// `Max`, which no chunk contains.
    #[must_use]
    pub fn find_owner(&self, key: &RangeBound) -> &Arc<ChunkEntry> {
        self.table.find_owner(key)
    }

    /// Resolves the owner of `chunk` at this view's read time.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::StaleChunkHistory` if the chunk's history does
    /// not reach back to the read time.
    pub fn owner_of(&self, chunk: &ChunkEntry) -> Result<ShardId, QueryError> {
        let Some(read_at) = self.read_at else {
            return Ok(chunk.shard);
        };
        chunk.shard_at(read_at).ok_or_else(|| QueryError::StaleChunkHistory {
            range: chunk.range.clone(),
            read_at,
        })
    }

    /// Returns the shard owning `key` at this view's read time.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::StaleChunkHistory` if the owning chunk's history
    /// does not reach back to the read time.
    pub fn shard_for_key(&self, key: &RangeBound) -> Result<ShardId, QueryError> {
        self.owner_of(self.find_owner(key))
    }

    /// Returns the shard owning a document key, mapped through the
    /// collection's shard key pattern.
    ///
    /// # Errors
    ///
    /// See [`RoutingTableView::shard_for_key`].
    pub fn shard_for_document(&self, document_key: &[u8]) -> Result<ShardId, QueryError> {
        let key = self.table.key_pattern().bound_for(document_key);
        self.shard_for_key(&key)
    }

    /// Returns every shard owning keys in `[min, max)`.
    ///
    /// The scan starts at the chunk containing `min` and stops at the first
    /// chunk starting at or after `max`, or as soon as every shard in the
    /// table has been seen. The full key space is answered from the shard
    /// index without a scan when there is no read time. An empty interval
    /// yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::StaleChunkHistory` if a chunk in the range cannot
    /// be resolved at the read time.
    pub fn shards_for_range(
        &self,
        min: &RangeBound,
        max: &RangeBound,
    ) -> Result<BTreeSet<ShardId>, QueryError> {
        if min >= max {
            return Ok(BTreeSet::new());
        }
        if self.read_at.is_none() && min.is_min() && max.is_max() {
            return Ok(self.table.shards().collect());
        }

        let shard_count = self.table.shard_count();
        let mut shards = BTreeSet::new();
        for chunk in self.table.chunks_from(min) {
            if chunk.range.min >= *max {
                break;
            }
            shards.insert(self.owner_of(chunk)?);
            // Historical owners may include shards no longer in the index.
            if self.read_at.is_none() && shards.len() == shard_count {
                break;
            }
        }
        Ok(shards)
    }

    /// Returns every shard owning part of the collection.
    ///
    /// # Errors
    ///
    /// See [`RoutingTableView::shards_for_range`].
    pub fn all_shards(&self) -> Result<BTreeSet<ShardId>, QueryError> {
        self.shards_for_range(&RangeBound::Min, &RangeBound::Max)
    }

    /// Returns the snapshot's collection version.
    #[must_use]
    pub fn collection_version(&self) -> ChunkVersion {
        self.table.collection_version()
    }

    /// Returns the highest chunk version owned by `shard`.
    #[must_use]
    pub fn shard_version(&self, shard: ShardId) -> Option<ChunkVersion> {
        self.table.shard_version(shard)
    }

    /// Returns the number of chunks in the snapshot.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.table.chunk_count()
    }

    /// Iterates all chunks in key order.
    pub fn chunks(&self) -> impl Iterator<Item = &Arc<ChunkEntry>> + '_ {
        self.table.chunks()
    }
}
