//! Shard-local ownership queries.
//!
//! An [`OwnershipFilter`] answers, for one shard, which parts of the key space
//! it owns and which documents it holds without owning them. The latter are
//! orphans: leftovers from a chunk that migrated away, or data that was
//! copied in ahead of a migration that never committed. Ranges the shard is
//! currently receiving are never reported as orphans.
//!
//! Ownership is always judged by each chunk's current owner, regardless of
//! any read time carried by the view.

use std::sync::Arc;

use tracing::trace;

use tessera_core::{ChunkRange, ChunkVersion, Limits, RangeBound, ShardId};

use crate::chunk::ChunkEntry;
use crate::view::RoutingTableView;

/// Ownership queries for a single shard.
#[derive(Debug, Clone)]
pub struct OwnershipFilter {
    view: RoutingTableView,
    local_shard: ShardId,
    /// Sorted by `min`, pairwise disjoint and non-adjacent.
    pending_incoming: Vec<ChunkRange>,
}

impl OwnershipFilter {
    /// Creates a filter for `local_shard`.
    ///
    /// `pending_incoming` may be unsorted and may overlap; it is normalized
    /// into disjoint ranges.
    #[must_use]
    pub fn new(
        view: RoutingTableView,
        local_shard: ShardId,
        pending_incoming: impl IntoIterator<Item = ChunkRange>,
    ) -> Self {
        Self {
            view,
            local_shard,
            pending_incoming: coalesce(pending_incoming.into_iter().collect()),
        }
    }

    /// Creates a filter, rejecting a pending-incoming set over the limit.
    ///
    /// # Errors
    ///
    /// Returns `Error::LimitExceeded` if more than
    /// `limits.max_pending_incoming_ranges` ranges are supplied.
    pub fn with_limits(
        view: RoutingTableView,
        local_shard: ShardId,
        pending_incoming: impl IntoIterator<Item = ChunkRange>,
        limits: &Limits,
    ) -> tessera_core::Result<Self> {
        let pending: Vec<ChunkRange> = pending_incoming.into_iter().collect();
        limits.check_pending_ranges(pending.len() as u64)?;
        Ok(Self::new(view, local_shard, pending))
    }

    /// Returns the shard this filter answers for.
    #[must_use]
    pub const fn local_shard(&self) -> ShardId {
        self.local_shard
    }

    /// Returns the view this filter queries.
    #[must_use]
    pub const fn view(&self) -> &RoutingTableView {
        &self.view
    }

    /// Returns the normalized pending-incoming ranges.
    #[must_use]
    pub fn pending_incoming(&self) -> &[ChunkRange] {
        &self.pending_incoming
    }

    /// Returns true if the chunk containing `key` belongs to the local shard.
    #[must_use]
    pub fn is_owned_by_local_shard(&self, key: &RangeBound) -> bool {
        self.view.find_owner(key).shard == self.local_shard
    }

    /// Returns true if `key` falls inside a range being migrated in.
    #[must_use]
    pub fn is_pending_incoming(&self, key: &RangeBound) -> bool {
        let idx = self.pending_incoming.partition_point(|range| range.max <= *key);
        self.pending_incoming
            .get(idx)
            .is_some_and(|range| range.contains(key))
    }

    /// Returns true if any chunk owned by the local shard overlaps `range`.
    #[must_use]
    pub fn range_overlaps_owned_chunk(&self, range: &ChunkRange) -> bool {
        self.view
            .table()
            .chunks_from(&range.min)
            .take_while(|chunk| chunk.range.min < range.max)
            .any(|chunk| chunk.shard == self.local_shard)
    }

    /// Iterates the chunks owned by the local shard, in key order.
    pub fn owned_chunks(&self) -> impl Iterator<Item = &Arc<ChunkEntry>> + '_ {
        let local = self.local_shard;
        self.view.chunks().filter(move |chunk| chunk.shard == local)
    }

    /// Returns the local shard's version, or the zero version of the
    /// table's epoch if it owns nothing.
    #[must_use]
    pub fn local_shard_version(&self) -> ChunkVersion {
        self.view
            .shard_version(self.local_shard)
            .unwrap_or_else(|| ChunkVersion::zero(self.view.table().epoch()))
    }

    /// Returns the first maximal orphan range at or after `starting_at`.
    ///
    /// An orphan range is a run of keys whose chunks are owned by other
    /// shards, minus any pending-incoming ranges. Adjacent non-local chunks
    /// are reported as one range. Returns `None` once no orphan remains
    /// after `starting_at`.
    ///
    /// Calling again from the returned range's `max` enumerates every
    /// orphan range exactly once. Each call stops at the end of the range it
    /// returns, so a full enumeration visits each chunk a bounded number of
    /// times.
    #[must_use]
    pub fn next_orphan_range(&self, starting_at: &RangeBound) -> Option<ChunkRange> {
        let mut visited = 0;
        let orphan = self.scan_orphan(starting_at, &mut visited);
        if let Some(orphan) = &orphan {
            trace!(
                local_shard = %self.local_shard,
                orphan = %orphan,
                chunks_visited = visited,
                "Found orphan range"
            );
        }
        orphan
    }

    /// Iterates every orphan range in key order.
    #[must_use]
    pub const fn orphan_ranges(&self) -> OrphanRanges<'_> {
        OrphanRanges {
            filter: self,
            cursor: Some(RangeBound::Min),
        }
    }

    /// Walks chunks and pending ranges together from `starting_at` until the
    /// first orphan range closes, counting the chunks visited.
    ///
    /// A run closes at the first local chunk or the first pending range that
    /// starts inside it. A pending range covering the head of a non-local
    /// chunk is skipped in one seek to its end.
    fn scan_orphan(&self, starting_at: &RangeBound, visited: &mut usize) -> Option<ChunkRange> {
        let table = self.view.table();
        let pending = &self.pending_incoming;

        // Keys below `lo` are already accounted for.
        let mut lo = starting_at.clone();
        let mut next_pending = pending.partition_point(|range| range.max <= lo);
        let mut run_min: Option<RangeBound> = None;
        let mut chunks = table.chunks_from(&lo);

        while let Some(chunk) = chunks.next() {
            *visited += 1;
            if chunk.shard == self.local_shard {
                if let Some(min) = run_min.take() {
                    return Some(ChunkRange {
                        min,
                        max: chunk.range.min.clone(),
                    });
                }
                continue;
            }

            let piece_min = (&chunk.range.min).max(&lo).clone();
            next_pending +=
                pending[next_pending..].partition_point(|range| range.max <= piece_min);
            match pending.get(next_pending) {
                Some(claimed) if claimed.min < chunk.range.max => {
                    if claimed.min > piece_min {
                        return Some(ChunkRange {
                            min: run_min.unwrap_or(piece_min),
                            max: claimed.min.clone(),
                        });
                    }
                    if let Some(min) = run_min.take() {
                        return Some(ChunkRange {
                            min,
                            max: piece_min,
                        });
                    }
                    lo = claimed.max.clone();
                    next_pending += 1;
                    chunks = table.chunks_from(&lo);
                }
                _ => {
                    run_min.get_or_insert(piece_min);
                }
            }
        }

        run_min.map(|min| ChunkRange {
            min,
            max: RangeBound::Max,
        })
    }
}

/// Iterator over a filter's orphan ranges. See
/// [`OwnershipFilter::orphan_ranges`].
#[derive(Debug)]
pub struct OrphanRanges<'a> {
    filter: &'a OwnershipFilter,
    cursor: Option<RangeBound>,
}

impl Iterator for OrphanRanges<'_> {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.take()?;
        let orphan = self.filter.next_orphan_range(&cursor)?;
        self.cursor = Some(orphan.max.clone());
        Some(orphan)
    }
}

/// Sorts ranges and merges any that overlap or touch.
fn coalesce(mut ranges: Vec<ChunkRange>) -> Vec<ChunkRange> {
    ranges.sort_by(|a, b| a.min.cmp(&b.min));

    let mut merged: Vec<ChunkRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.min <= last.max => {
                if range.max > last.max {
                    last.max = range.max;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}
