//! Routing error types.
//!
//! Build and update failures are distinct types so that callers can tell a
//! corrupt catalog snapshot apart from a diff that merely cannot be applied
//! to the snapshot they hold.

use thiserror::Error;

use tessera_core::{ChunkRange, ChunkVersion, CollectionEpoch, LogicalTime, RangeBound, ShardId};

/// Result type for full builds.
pub type BuildResult<T> = Result<T, BuildError>;

/// Result type for incremental updates.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// A chunk list that does not describe a valid routing table.
///
/// These indicate an internally inconsistent catalog snapshot. No partial
/// table is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Two chunks cover the same keys.
    #[error("chunks {left} and {right} overlap")]
    Overlap {
        /// The earlier chunk range.
        left: ChunkRange,
        /// The later chunk range.
        right: ChunkRange,
    },

    /// Part of the key space is not covered by any chunk.
    #[error("no chunk covers [{after}, {before})")]
    Gap {
        /// Where the uncovered region starts.
        after: RangeBound,
        /// Where the uncovered region ends.
        before: RangeBound,
    },

    /// A chunk's range holds no keys.
    #[error("chunk {range} is empty")]
    EmptyRange {
        /// The offending chunk's range.
        range: ChunkRange,
    },

    /// A chunk belongs to a different collection incarnation.
    #[error("chunk {range} has epoch {found}, table epoch is {expected}")]
    EpochMismatch {
        /// The epoch the table is being built for.
        expected: CollectionEpoch,
        /// The epoch carried by the offending chunk.
        found: CollectionEpoch,
        /// The offending chunk's range.
        range: ChunkRange,
    },

    /// The chunk list exceeds the configured limit.
    #[error("too many chunks: {count} (max {max})")]
    TooManyChunks {
        /// Number of chunks supplied.
        count: u64,
        /// Maximum allowed.
        max: u64,
    },
}

/// A diff that cannot be applied to the table it was offered to.
///
/// Updates are all-or-nothing: on error the previous table is unchanged and
/// no new table is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// The collection was dropped or recreated; the caller must rebuild.
    #[error("epoch changed from {current} to {received}; full rebuild required")]
    EpochChanged {
        /// The table's epoch.
        current: CollectionEpoch,
        /// The epoch carried by the diff.
        received: CollectionEpoch,
    },

    /// The diff contained no entries.
    #[error("empty diff")]
    EmptyDiff,

    /// A diff entry's range holds no keys.
    #[error("diff entry {range} is empty")]
    EmptyRange {
        /// The diff entry's range.
        range: ChunkRange,
    },

    /// Two diff entries cover the same keys.
    #[error("diff entries {left} and {right} overlap")]
    OverlappingDiff {
        /// The earlier diff range.
        left: ChunkRange,
        /// The later diff range.
        right: ChunkRange,
    },

    /// A diff entry is older than an entry it would replace.
    #[error("diff entry {range} at {received} is older than existing {current}")]
    StaleVersion {
        /// The diff entry's range.
        range: ChunkRange,
        /// The version of the entry currently in the table.
        current: ChunkVersion,
        /// The version carried by the diff entry.
        received: ChunkVersion,
    },

    /// A diff entry claims an existing version for a different owner.
    #[error("diff entry {range} at {version} names {received}, table has {current}")]
    VersionConflict {
        /// The diff entry's range.
        range: ChunkRange,
        /// The shared version.
        version: ChunkVersion,
        /// Owner in the table.
        current: ShardId,
        /// Owner in the diff.
        received: ShardId,
    },

    /// The diff only partially replaces an existing chunk.
    #[error("diff run {diff} does not align with existing chunk {existing}")]
    BoundaryMismatch {
        /// The contiguous run of diff entries.
        diff: ChunkRange,
        /// The existing chunk it partially overlaps.
        existing: ChunkRange,
    },
}

impl UpdateError {
    /// Returns true if the only way forward is a full rebuild.
    ///
    /// Every other variant means the diff itself was malformed; fetching the
    /// diff again may succeed.
    #[must_use]
    pub const fn requires_full_rebuild(&self) -> bool {
        matches!(self, Self::EpochChanged { .. })
    }
}

/// A query that cannot be answered from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The chunk's history does not reach back to the requested read time.
    #[error("chunk {range} has no placement history at or before {read_at}")]
    StaleChunkHistory {
        /// The chunk whose history is too short.
        range: ChunkRange,
        /// The requested read time.
        read_at: LogicalTime,
    },
}

/// Errors reported by a [`crate::CatalogSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The catalog could not be reached.
    #[error("catalog unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
    },

    /// The collection is no longer sharded.
    #[error("collection not found in catalog")]
    CollectionNotFound,
}

/// Errors from refreshing a [`crate::CollectionRouter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// Fetching from the catalog failed.
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] CatalogError),

    /// The catalog snapshot was inconsistent.
    #[error("full build failed: {0}")]
    Build(#[from] BuildError),

    /// The catalog diff could not be applied.
    #[error("incremental update failed: {0}")]
    Update(#[from] UpdateError),
}

/// Errors from routing a key through a [`crate::CollectionRouter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No routing table is loaded; a refresh is required.
    #[error("routing table not loaded")]
    NotLoaded,

    /// The query could not be answered at the requested read time.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A request exceeded a configured limit.
    #[error(transparent)]
    Limit(#[from] tessera_core::Error),
}
