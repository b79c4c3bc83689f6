//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.
//! A routing table, a diff batch, and a pending-migration set each have an
//! explicit maximum size, which keeps refresh cost predictable.

/// Default maximum number of chunks in one collection's routing table.
pub const CHUNKS_PER_COLLECTION_MAX: u64 = 1_000_000;

/// Default maximum number of entries applied as one incremental diff.
pub const DIFF_ENTRIES_MAX: u64 = 50_000;

/// Default maximum number of ranges a shard may be receiving at once.
pub const PENDING_INCOMING_RANGES_MAX: u64 = 1_024;

/// Limits for routing tables and their refresh.
///
/// All limits are explicit and configurable. Default values are chosen
/// to be safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of chunks accepted by a full build.
    pub max_chunks_per_collection: u64,
    /// Maximum diff size applied incrementally.
    ///
    /// Larger diffs are cheaper to apply as a full rebuild.
    pub max_diff_entries: u64,
    /// Maximum number of in-flight incoming ranges tracked per shard.
    pub max_pending_incoming_ranges: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_chunks_per_collection: CHUNKS_PER_COLLECTION_MAX,
            max_diff_entries: DIFF_ENTRIES_MAX,
            max_pending_incoming_ranges: PENDING_INCOMING_RANGES_MAX,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_chunks_per_collection == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_chunks_per_collection",
                reason: "must be positive",
            });
        }

        if self.max_diff_entries == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_diff_entries",
                reason: "must be positive",
            });
        }

        // A diff can never replace more chunks than a table may hold.
        if self.max_diff_entries > self.max_chunks_per_collection {
            return Err(crate::Error::InvalidArgument {
                name: "max_diff_entries",
                reason: "must be <= max_chunks_per_collection",
            });
        }

        Ok(())
    }

    /// Checks a chunk count against `max_chunks_per_collection`.
    ///
    /// # Errors
    /// Returns `Error::LimitExceeded` if `count` is over the limit.
    pub const fn check_chunk_count(&self, count: u64) -> crate::Result<()> {
        if count > self.max_chunks_per_collection {
            return Err(crate::Error::LimitExceeded {
                limit: "max_chunks_per_collection",
                max: self.max_chunks_per_collection,
                actual: count,
            });
        }
        Ok(())
    }

    /// Checks a pending-range count against `max_pending_incoming_ranges`.
    ///
    /// # Errors
    /// Returns `Error::LimitExceeded` if `count` is over the limit.
    pub const fn check_pending_ranges(&self, count: u64) -> crate::Result<()> {
        if count > self.max_pending_incoming_ranges {
            return Err(crate::Error::LimitExceeded {
                limit: "max_pending_incoming_ranges",
                max: self.max_pending_incoming_ranges,
                actual: count,
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
