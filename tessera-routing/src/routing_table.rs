//! Routing table - the versioned range index for one sharded collection.
//!
//! A routing table maps every key of the collection's shard key space to
//! exactly one chunk. Tables are persistent values: `build` creates one from
//! an authoritative chunk list, and `apply_diff` derives a new table from an
//! old one plus a batch of changed chunks. The old table is never modified
//! and stays valid for as long as anyone holds it.
//!
//! # Representation
//!
//! Chunks live in an `im::OrdMap` keyed by `range.max`, holding
//! `Arc<ChunkEntry>`. Cloning the map is O(1) and each insert or remove
//! copies only the B-tree path it touches, so a refresh of D chunks against
//! a table of N chunks costs O(D log N) and every untouched entry is the same
//! allocation in both tables.
//!
//! Alongside the chunks, each shard keeps an ordered set of the versions of
//! the chunks it owns. Its maximum is the shard version, and the key set of
//! the shard index answers "which shards hold data" without a scan.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use im::{OrdMap, OrdSet};
use tessera_core::{
    ChunkRange, ChunkVersion, CollectionEpoch, Limits, RangeBound, ShardId, ShardKeyPattern,
};
use tracing::{debug, trace};

use crate::chunk::ChunkEntry;
use crate::error::{BuildError, BuildResult, UpdateError, UpdateResult};

/// Position of one chunk in its shard's version index.
///
/// Ordered by version first; `max` disambiguates chunks that share a
/// version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct VersionSlot {
    major: u64,
    minor: u64,
    max: RangeBound,
}

impl VersionSlot {
    fn of(entry: &ChunkEntry) -> Self {
        Self {
            major: entry.version.major,
            minor: entry.version.minor,
            max: entry.range.max.clone(),
        }
    }
}

/// An immutable, contiguous range index over a collection's chunks.
///
/// Invariants, established by [`RoutingTable::build`] and preserved by
/// [`RoutingTable::apply_diff`]:
///
/// 1. Chunks are ordered by `range.max` and consecutive chunks abut exactly.
/// 2. The first chunk starts at `Min` and the last ends at `Max`.
/// 3. Every chunk carries the table's epoch.
/// 4. Shard versions and the collection version equal the maximum chunk
///    version per shard and overall.
#[derive(Clone)]
pub struct RoutingTable {
    /// Collection incarnation.
    epoch: CollectionEpoch,
    /// How document keys map onto the key space.
    key_pattern: ShardKeyPattern,
    /// Chunks keyed by their exclusive upper bound.
    chunks: OrdMap<RangeBound, Arc<ChunkEntry>>,
    /// Per-shard ordered set of owned chunk versions.
    shards: OrdMap<ShardId, OrdSet<VersionSlot>>,
    /// Maximum chunk version in the table.
    collection_version: ChunkVersion,
}

impl RoutingTable {
    /// Builds a routing table from a complete chunk list using default
    /// limits.
    ///
    /// # Errors
    ///
    /// See [`RoutingTable::build_with_limits`].
    pub fn build(
        epoch: CollectionEpoch,
        key_pattern: ShardKeyPattern,
        entries: impl IntoIterator<Item = ChunkEntry>,
    ) -> BuildResult<Self> {
        Self::build_with_limits(epoch, key_pattern, entries, &Limits::new())
    }

    /// Builds a routing table from a complete chunk list.
    ///
    /// The entries may arrive in any order. They are sorted by `range.min`
    /// and validated in a single pass, which also computes the shard and
    /// collection versions.
    ///
    /// # Errors
    ///
    /// - `BuildError::TooManyChunks` if the list exceeds the chunk limit.
    /// - `BuildError::EmptyRange` if a chunk's range holds no keys.
    /// - `BuildError::EpochMismatch` if a chunk carries a different epoch.
    /// - `BuildError::Overlap` if two chunks share keys.
    /// - `BuildError::Gap` if part of the key space is uncovered, including
    ///   an empty list.
    pub fn build_with_limits(
        epoch: CollectionEpoch,
        key_pattern: ShardKeyPattern,
        entries: impl IntoIterator<Item = ChunkEntry>,
        limits: &Limits,
    ) -> BuildResult<Self> {
        let mut entries: Vec<ChunkEntry> = entries.into_iter().collect();
        let count = entries.len() as u64;
        if limits.check_chunk_count(count).is_err() {
            return Err(BuildError::TooManyChunks {
                count,
                max: limits.max_chunks_per_collection,
            });
        }

        if let Some(empty) = entries.iter().find(|e| e.range.is_empty()) {
            return Err(BuildError::EmptyRange {
                range: empty.range.clone(),
            });
        }

        entries.sort_by(|a, b| a.range.min.cmp(&b.range.min));

        let mut chunks = OrdMap::new();
        let mut shards: BTreeMap<ShardId, OrdSet<VersionSlot>> = BTreeMap::new();
        let mut collection_version = ChunkVersion::zero(epoch);
        // End of the contiguous coverage so far.
        let mut covered_to = RangeBound::Min;
        let mut last_range: Option<ChunkRange> = None;

        for entry in entries {
            if entry.version.epoch != epoch {
                return Err(BuildError::EpochMismatch {
                    expected: epoch,
                    found: entry.version.epoch,
                    range: entry.range,
                });
            }

            if entry.range.min > covered_to {
                return Err(BuildError::Gap {
                    after: covered_to,
                    before: entry.range.min,
                });
            }
            if entry.range.min < covered_to {
                if let Some(left) = last_range.take() {
                    return Err(BuildError::Overlap {
                        left,
                        right: entry.range,
                    });
                }
            }

            collection_version = collection_version.max_of(entry.version);
            shards.entry(entry.shard).or_default().insert(VersionSlot::of(&entry));
            covered_to = entry.range.max.clone();
            last_range = Some(entry.range.clone());
            chunks.insert(entry.range.max.clone(), Arc::new(entry));
        }

        if !covered_to.is_max() {
            return Err(BuildError::Gap {
                after: covered_to,
                before: RangeBound::Max,
            });
        }

        let table = Self {
            epoch,
            key_pattern,
            chunks,
            shards: shards.into_iter().collect(),
            collection_version,
        };

        debug!(
            epoch = %epoch,
            chunks = table.chunk_count(),
            shards = table.shard_count(),
            version = %collection_version,
            "Built routing table"
        );

        Ok(table)
    }

    /// Derives a new table by replacing the chunks covered by `diff`.
    ///
    /// Diff entries may arrive in any order. Contiguous diff entries form a
    /// run; each run must exactly replace one or more existing chunks, so a
    /// run may split, merge, or move ranges but never leave part of an
    /// existing chunk behind. A diff entry identical to the current chunk is
    /// accepted and leaves that chunk shared with `self`.
    ///
    /// # Errors
    ///
    /// - `UpdateError::EmptyDiff` if `diff` is empty.
    /// - `UpdateError::EpochChanged` if any entry carries another epoch; the
    ///   caller must do a full build.
    /// - `UpdateError::EmptyRange` if a diff entry's range holds no keys.
    /// - `UpdateError::OverlappingDiff` if two diff entries share keys.
    /// - `UpdateError::BoundaryMismatch` if a run partially covers an
    ///   existing chunk.
    /// - `UpdateError::StaleVersion` if a diff entry is older than a chunk it
    ///   replaces.
    /// - `UpdateError::VersionConflict` if a diff entry repeats an existing
    ///   range and version with a different owner.
    ///
    /// On error `self` is unchanged and no table is produced.
    pub fn apply_diff(&self, diff: impl IntoIterator<Item = ChunkEntry>) -> UpdateResult<Self> {
        let mut diff: Vec<ChunkEntry> = diff.into_iter().collect();
        if diff.is_empty() {
            return Err(UpdateError::EmptyDiff);
        }

        if let Some(foreign) = diff.iter().find(|e| e.version.epoch != self.epoch) {
            return Err(UpdateError::EpochChanged {
                current: self.epoch,
                received: foreign.version.epoch,
            });
        }

        if let Some(empty) = diff.iter().find(|e| e.range.is_empty()) {
            return Err(UpdateError::EmptyRange {
                range: empty.range.clone(),
            });
        }

        diff.sort_by(|a, b| a.range.min.cmp(&b.range.min));
        for pair in diff.windows(2) {
            if pair[0].range.max > pair[1].range.min {
                return Err(UpdateError::OverlappingDiff {
                    left: pair[0].range.clone(),
                    right: pair[1].range.clone(),
                });
            }
        }

        let mut next = self.clone();
        let mut stats = SpliceStats::default();
        let mut run_start = 0;
        for i in 1..=diff.len() {
            if i == diff.len() || diff[i - 1].range.max != diff[i].range.min {
                next.splice_run(&diff[run_start..i], &mut stats)?;
                run_start = i;
            }
        }

        debug!(
            epoch = %self.epoch,
            diff_entries = diff.len(),
            replaced = stats.replaced,
            unchanged = stats.unchanged,
            chunks = next.chunk_count(),
            version = %next.collection_version,
            "Applied routing table diff"
        );

        Ok(next)
    }

    /// Replaces the chunks covered by one contiguous, sorted run of diff
    /// entries.
    fn splice_run(&mut self, run: &[ChunkEntry], stats: &mut SpliceStats) -> UpdateResult<()> {
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            return Ok(());
        };
        let run_range = ChunkRange {
            min: first.range.min.clone(),
            max: last.range.max.clone(),
        };

        let overlapped: Vec<Arc<ChunkEntry>> = self
            .chunks_from(&run_range.min)
            .take_while(|existing| existing.range.min < run_range.max)
            .cloned()
            .collect();

        let (Some(head), Some(tail)) = (overlapped.first(), overlapped.last()) else {
            panic!("routing table corruption: no chunk overlaps {run_range}");
        };
        if head.range.min != run_range.min {
            return Err(UpdateError::BoundaryMismatch {
                diff: run_range,
                existing: head.range.clone(),
            });
        }
        if tail.range.max != run_range.max {
            return Err(UpdateError::BoundaryMismatch {
                diff: run_range,
                existing: tail.range.clone(),
            });
        }

        check_versions(run, &overlapped)?;

        // Validation is complete; from here on the splice cannot fail.
        let is_unchanged = |existing: &ChunkEntry| {
            run.binary_search_by(|e| e.range.min.cmp(&existing.range.min))
                .is_ok_and(|idx| run[idx] == *existing)
        };

        for existing in &overlapped {
            if is_unchanged(&**existing) {
                stats.unchanged += 1;
                continue;
            }
            self.chunks.remove(&existing.range.max);
            self.remove_slot(existing);
            stats.replaced += 1;
        }

        for incoming in run {
            self.collection_version = self.collection_version.max_of(incoming.version);
            if self.chunks.contains_key(&incoming.range.max) {
                // Kept as-is above.
                continue;
            }
            self.insert_slot(incoming);
            self.chunks.insert(incoming.range.max.clone(), Arc::new(incoming.clone()));
        }

        self.assert_boundaries(&run_range);
        trace!(range = %run_range, entries = run.len(), "Spliced diff run");
        Ok(())
    }

    /// Checks coverage invariants around a freshly spliced region only.
    ///
    /// # Panics
    ///
    /// Panics if the region does not join its neighbors exactly. Validation
    /// in `splice_run` makes this unreachable; a failure is a bug here, not
    /// bad input.
    fn assert_boundaries(&self, region: &ChunkRange) {
        if !region.min.is_min() {
            assert!(
                self.chunks.contains_key(&region.min),
                "routing table corruption: no chunk ends at {}",
                region.min
            );
        }

        let mut cursor = region.min.clone();
        for entry in self.chunks_from(&region.min) {
            assert!(
                entry.range.min == cursor,
                "routing table corruption: chunk {} does not start at {cursor}",
                entry.range
            );
            cursor = entry.range.max.clone();
            if cursor >= region.max {
                break;
            }
        }
        assert!(
            cursor == region.max,
            "routing table corruption: region {region} ends at {cursor}"
        );

        if region.max.is_max() {
            return;
        }
        let next = self.chunks_from(&region.max).next();
        assert!(
            next.is_some_and(|entry| entry.range.min == region.max),
            "routing table corruption: no chunk starts at {}",
            region.max
        );
    }

    fn insert_slot(&mut self, entry: &ChunkEntry) {
        let mut slots = self.shards.get(&entry.shard).cloned().unwrap_or_default();
        slots.insert(VersionSlot::of(entry));
        self.shards.insert(entry.shard, slots);
    }

    fn remove_slot(&mut self, entry: &ChunkEntry) {
        let Some(mut slots) = self.shards.get(&entry.shard).cloned() else {
            panic!("routing table corruption: {} missing from shard index", entry.shard);
        };
        slots.remove(&VersionSlot::of(entry));
        if slots.is_empty() {
            self.shards.remove(&entry.shard);
        } else {
            self.shards.insert(entry.shard, slots);
        }
    }

    /// Returns the chunk whose range contains `key`.
    ///
    /// # Panics
    ///
    /// Panics if no chunk contains `key`. The coverage invariant makes this
    /// unreachable for any key below `Max`; it signals index corruption, or a
    /// caller asking for the owner of `Max` itself.
    #[must_use]
    pub fn find_owner(&self, key: &RangeBound) -> &Arc<ChunkEntry> {
        match self.chunks_from(key).next() {
            Some(entry) if entry.contains(key) => entry,
            _ => panic!("routing table corruption: no chunk contains {key}"),
        }
    }

    /// Iterates chunks in key order, starting with the one containing `key`.
    ///
    /// Equivalently: every chunk whose `range.max` is strictly greater than
    /// `key`.
    pub fn chunks_from<'a>(
        &'a self,
        key: &RangeBound,
    ) -> impl Iterator<Item = &'a Arc<ChunkEntry>> + 'a {
        self.chunks.range((Excluded(key), Unbounded)).map(|(_, entry)| entry)
    }

    /// Iterates all chunks in key order.
    pub fn chunks(&self) -> impl Iterator<Item = &Arc<ChunkEntry>> + '_ {
        self.chunks.values()
    }

    /// Returns the number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns the number of shards owning at least one chunk.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Iterates shards owning at least one chunk, in id order.
    pub fn shards(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.shards.keys().copied()
    }

    /// Returns true if `shard` owns at least one chunk.
    #[must_use]
    pub fn has_shard(&self, shard: ShardId) -> bool {
        self.shards.contains_key(&shard)
    }

    /// Returns the highest version among chunks owned by `shard`.
    #[must_use]
    pub fn shard_version(&self, shard: ShardId) -> Option<ChunkVersion> {
        self.shards
            .get(&shard)
            .and_then(OrdSet::get_max)
            .map(|slot| ChunkVersion::new(self.epoch, slot.major, slot.minor))
    }

    /// Returns the number of chunks owned by `shard`.
    #[must_use]
    pub fn shard_chunk_count(&self, shard: ShardId) -> usize {
        self.shards.get(&shard).map_or(0, OrdSet::len)
    }

    /// Returns the highest chunk version in the table.
    #[must_use]
    pub const fn collection_version(&self) -> ChunkVersion {
        self.collection_version
    }

    /// Returns the collection epoch.
    #[must_use]
    pub const fn epoch(&self) -> CollectionEpoch {
        self.epoch
    }

    /// Returns the shard key pattern.
    #[must_use]
    pub const fn key_pattern(&self) -> ShardKeyPattern {
        self.key_pattern
    }
}

/// Counters collected while applying one diff.
#[derive(Debug, Default)]
struct SpliceStats {
    replaced: usize,
    unchanged: usize,
}

/// Checks every diff entry in `run` against the existing chunks it overlaps.
///
/// Both slices are sorted by `range.min` and span the same region.
fn check_versions(run: &[ChunkEntry], overlapped: &[Arc<ChunkEntry>]) -> UpdateResult<()> {
    let mut first_overlap = 0;
    for incoming in run {
        while first_overlap < overlapped.len()
            && overlapped[first_overlap].range.max <= incoming.range.min
        {
            first_overlap += 1;
        }

        for existing in overlapped[first_overlap..]
            .iter()
            .take_while(|existing| existing.range.min < incoming.range.max)
        {
            if incoming.version.is_stale(&existing.version) {
                return Err(UpdateError::StaleVersion {
                    range: incoming.range.clone(),
                    current: existing.version,
                    received: incoming.version,
                });
            }
            if incoming.same_placement(existing) && incoming.shard != existing.shard {
                return Err(UpdateError::VersionConflict {
                    range: incoming.range.clone(),
                    version: incoming.version,
                    current: existing.shard,
                    received: incoming.shard,
                });
            }
        }
    }
    Ok(())
}

impl PartialEq for RoutingTable {
    /// Tables are equal when they hold equal chunks; the derived shard index
    /// follows.
    fn eq(&self, other: &Self) -> bool {
        self.epoch == other.epoch
            && self.key_pattern == other.key_pattern
            && self.collection_version == other.collection_version
            && self.chunks == other.chunks
    }
}

impl Eq for RoutingTable {}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("epoch", &self.epoch)
            .field("key_pattern", &self.key_pattern)
            .field("collection_version", &self.collection_version)
            .field("chunks", &self.chunks.len())
            .field("shards", &self.shards.keys().collect::<Vec<_>>())
            .finish()
    }
}
