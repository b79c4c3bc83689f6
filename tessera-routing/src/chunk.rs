//! Chunk entries - one contiguous key range, its version, and its owner.

use std::sync::Arc;

use tessera_core::{ChunkRange, ChunkVersion, LogicalTime, RangeBound, ShardId};

/// One historical placement of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHistory {
    /// The placement is valid for reads at or after this time.
    pub valid_after: LogicalTime,
    /// The shard that owned the chunk from `valid_after` onwards.
    pub shard: ShardId,
}

impl ChunkHistory {
    /// Creates a new history record.
    #[must_use]
    pub const fn new(valid_after: LogicalTime, shard: ShardId) -> Self {
        Self { valid_after, shard }
    }
}

/// An immutable `(range, version, shard)` triple.
///
/// Entries are shared between routing table snapshots through `Arc`, so an
/// entry untouched by a refresh is the same allocation in the old and the
/// new table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkEntry {
    /// The key range this chunk covers.
    pub range: ChunkRange,
    /// Version of the chunk's current placement.
    pub version: ChunkVersion,
    /// The shard currently owning the range.
    pub shard: ShardId,
    /// Past placements, newest first. Empty when history is not tracked.
    history: Arc<[ChunkHistory]>,
}

impl ChunkEntry {
    /// Creates a chunk entry without placement history.
    #[must_use]
    pub fn new(range: ChunkRange, version: ChunkVersion, shard: ShardId) -> Self {
        Self {
            range,
            version,
            shard,
            history: Arc::from(Vec::new()),
        }
    }

    /// Attaches placement history to the entry.
    ///
    /// The history is sorted newest first regardless of input order.
    ///
    /// # Panics
    ///
    /// Panics if the newest placement does not name the current shard.
    #[must_use]
    pub fn with_history(mut self, history: impl IntoIterator<Item = ChunkHistory>) -> Self {
        let mut history: Vec<ChunkHistory> = history.into_iter().collect();
        history.sort_by(|a, b| b.valid_after.cmp(&a.valid_after));
        if let Some(newest) = history.first() {
            assert_eq!(
                newest.shard, self.shard,
                "newest history placement must name the current owner"
            );
        }
        self.history = Arc::from(history);
        self
    }

    /// Returns the placement history, newest first.
    #[must_use]
    pub fn history(&self) -> &[ChunkHistory] {
        &self.history
    }

    /// Returns true if this entry's range contains `key`.
    #[must_use]
    pub fn contains(&self, key: &RangeBound) -> bool {
        self.range.contains(key)
    }

    /// Returns the shard that owned this chunk as of `read_at`.
    ///
    /// Entries without history are assumed to have had their current owner
    /// forever. Returns `None` if history exists but does not reach back far
    /// enough to answer for `read_at`.
    #[must_use]
    pub fn shard_at(&self, read_at: LogicalTime) -> Option<ShardId> {
        if self.history.is_empty() {
            return Some(self.shard);
        }
        self.history
            .iter()
            .find(|placement| placement.valid_after <= read_at)
            .map(|placement| placement.shard)
    }

    /// Returns true if the two entries describe the same range at the same
    /// version.
    #[must_use]
    pub fn same_placement(&self, other: &Self) -> bool {
        self.range == other.range && self.version == other.version
    }
}
