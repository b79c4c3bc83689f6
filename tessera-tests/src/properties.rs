//! Property definitions and checkers for routing table tests.
//!
//! Properties are invariants that must hold for every table a test builds or
//! derives. Each check compares the table against a brute-force answer
//! computed from its chunk list, so a bug has to appear twice, in two
//! different algorithms, to go unnoticed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tessera_core::{ChunkRange, ChunkVersion, RangeBound, ShardId};
use tessera_routing::{ChunkEntry, OwnershipFilter, RoutingTable};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of a routing table property.
#[derive(Debug, Clone)]
pub enum PropertyViolation {
    /// Part of the key space is not covered.
    Gap {
        /// End of the covered prefix.
        after: RangeBound,
        /// Start of the next chunk.
        before: RangeBound,
    },
    /// Two chunks share keys.
    Overlap {
        /// The earlier chunk.
        left: ChunkRange,
        /// The later chunk.
        right: ChunkRange,
    },
    /// A chunk carries another epoch than its table.
    WrongEpoch {
        /// The offending chunk.
        range: ChunkRange,
    },
    /// A point lookup disagrees with a linear scan.
    LookupMismatch {
        /// The key looked up.
        key: RangeBound,
        /// The chunk a linear scan finds.
        expected: ChunkRange,
        /// The chunk the table returned.
        found: ChunkRange,
    },
    /// A shard version is not the maximum over the shard's chunks.
    ShardVersionMismatch {
        /// The shard.
        shard: ShardId,
        /// Maximum over the chunk list.
        expected: Option<ChunkVersion>,
        /// What the table reports.
        found: Option<ChunkVersion>,
    },
    /// The collection version is not the maximum chunk version.
    CollectionVersionMismatch {
        /// Maximum over the chunk list.
        expected: ChunkVersion,
        /// What the table reports.
        found: ChunkVersion,
    },
    /// An entry that survived an update is not shared with the old table.
    NotShared {
        /// The entry's range.
        range: ChunkRange,
    },
    /// The collection version went backwards across an update.
    VersionRegressed {
        /// Before the update.
        before: ChunkVersion,
        /// After the update.
        after: ChunkVersion,
    },
    /// Orphan enumeration disagrees with a brute-force computation.
    OrphanMismatch {
        /// The local shard.
        shard: ShardId,
        /// Brute-force orphan ranges.
        expected: Vec<ChunkRange>,
        /// Ranges returned by `next_orphan_range`.
        found: Vec<ChunkRange>,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gap { after, before } => write!(f, "Gap: no chunk covers [{after}, {before})"),
            Self::Overlap { left, right } => write!(f, "Overlap: {left} and {right}"),
            Self::WrongEpoch { range } => write!(f, "Chunk {range} carries a foreign epoch"),
            Self::LookupMismatch {
                key,
                expected,
                found,
            } => {
                write!(f, "Lookup of {key} returned {found}, linear scan found {expected}")
            }
            Self::ShardVersionMismatch {
                shard,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Shard {shard} version is {found:?}, chunks say {expected:?}"
                )
            }
            Self::CollectionVersionMismatch { expected, found } => {
                write!(f, "Collection version is {found}, chunks say {expected}")
            }
            Self::NotShared { range } => {
                write!(f, "Unchanged chunk {range} was copied instead of shared")
            }
            Self::VersionRegressed { before, after } => {
                write!(f, "Collection version went from {before} to {after}")
            }
            Self::OrphanMismatch {
                shard,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Orphans of {shard}: enumerated {found:?}, expected {expected:?}"
                )
            }
        }
    }
}

// ============================================================================
// Property Checker
// ============================================================================

/// Accumulates violations across the tables a test produces.
#[derive(Debug, Default)]
pub struct PropertyChecker {
    /// Number of tables checked.
    tables_checked: u64,
    /// Violations found.
    violations: Vec<PropertyViolation>,
}

impl PropertyChecker {
    /// Creates a new property checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks coverage, epochs, and versions of `table`.
    pub fn check_table(&mut self, table: &RoutingTable) {
        self.tables_checked += 1;
        self.check_coverage(table);
        self.check_versions(table);
    }

    fn check_coverage(&mut self, table: &RoutingTable) {
        let mut covered_to = RangeBound::Min;
        let mut previous: Option<&ChunkRange> = None;

        for chunk in table.chunks() {
            if chunk.version.epoch != table.epoch() {
                self.violations.push(PropertyViolation::WrongEpoch {
                    range: chunk.range.clone(),
                });
            }
            if chunk.range.min > covered_to {
                self.violations.push(PropertyViolation::Gap {
                    after: covered_to.clone(),
                    before: chunk.range.min.clone(),
                });
            } else if chunk.range.min < covered_to {
                if let Some(left) = previous {
                    self.violations.push(PropertyViolation::Overlap {
                        left: left.clone(),
                        right: chunk.range.clone(),
                    });
                }
            }
            covered_to = chunk.range.max.clone();
            previous = Some(&chunk.range);
        }

        if !covered_to.is_max() {
            self.violations.push(PropertyViolation::Gap {
                after: covered_to,
                before: RangeBound::Max,
            });
        }
    }

    fn check_versions(&mut self, table: &RoutingTable) {
        let mut per_shard: BTreeMap<ShardId, ChunkVersion> = BTreeMap::new();
        let mut collection = ChunkVersion::zero(table.epoch());
        for chunk in table.chunks() {
            per_shard
                .entry(chunk.shard)
                .and_modify(|version| *version = version.max_of(chunk.version))
                .or_insert(chunk.version);
            collection = collection.max_of(chunk.version);
        }

        if table.collection_version() != collection {
            self.violations.push(PropertyViolation::CollectionVersionMismatch {
                expected: collection,
                found: table.collection_version(),
            });
        }
        let shards: BTreeSet<ShardId> = table.shards().chain(per_shard.keys().copied()).collect();
        for shard in shards {
            let expected = per_shard.get(&shard).copied();
            let found = table.shard_version(shard);
            if expected != found {
                self.violations.push(PropertyViolation::ShardVersionMismatch {
                    shard,
                    expected,
                    found,
                });
            }
        }
    }

    /// Checks `find_owner` for each key against a linear scan.
    pub fn check_lookups(&mut self, table: &RoutingTable, keys: &[RangeBound]) {
        for key in keys {
            let Some(expected) = table.chunks().find(|chunk| chunk.range.contains(key)) else {
                continue;
            };
            let found = table.find_owner(key);
            if !Arc::ptr_eq(expected, found) {
                self.violations.push(PropertyViolation::LookupMismatch {
                    key: key.clone(),
                    expected: expected.range.clone(),
                    found: found.range.clone(),
                });
            }
        }
    }

    /// Checks an update from `before` to `after`.
    ///
    /// Every entry of `after` that also appears, unchanged, in `before` must
    /// be the same allocation, and the collection version must not regress.
    pub fn check_update(&mut self, before: &RoutingTable, after: &RoutingTable) {
        self.check_table(after);

        let old: BTreeMap<&RangeBound, &Arc<ChunkEntry>> =
            before.chunks().map(|chunk| (&chunk.range.max, chunk)).collect();
        for chunk in after.chunks() {
            if let Some(previous) = old.get(&chunk.range.max) {
                if ***previous == **chunk && !Arc::ptr_eq(*previous, chunk) {
                    self.violations.push(PropertyViolation::NotShared {
                        range: chunk.range.clone(),
                    });
                }
            }
        }

        if after.epoch() == before.epoch()
            && after.collection_version().placement() < before.collection_version().placement()
        {
            self.violations.push(PropertyViolation::VersionRegressed {
                before: before.collection_version(),
                after: after.collection_version(),
            });
        }
    }

    /// Checks that repeated `next_orphan_range` calls enumerate exactly the
    /// non-local, non-pending key space as maximal ranges.
    pub fn check_orphans(&mut self, filter: &OwnershipFilter) {
        let expected = brute_force_orphans(filter);

        let mut found = Vec::new();
        let mut cursor = RangeBound::Min;
        while let Some(orphan) = filter.next_orphan_range(&cursor) {
            cursor = orphan.max.clone();
            found.push(orphan);
            if found.len() > expected.len() {
                break;
            }
        }

        if found != expected {
            self.violations.push(PropertyViolation::OrphanMismatch {
                shard: filter.local_shard(),
                expected,
                found,
            });
        }
    }

    /// Returns the violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }

    /// Returns the number of tables checked.
    #[must_use]
    pub const fn tables_checked(&self) -> u64 {
        self.tables_checked
    }

    /// Returns true if no violations were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Computes orphan ranges chunk by chunk, without the coalescing walk.
fn brute_force_orphans(filter: &OwnershipFilter) -> Vec<ChunkRange> {
    // Split every non-local chunk around the pending ranges.
    let mut pieces: Vec<ChunkRange> = Vec::new();
    for chunk in filter.view().chunks() {
        if chunk.shard == filter.local_shard() {
            continue;
        }
        let mut remaining = vec![chunk.range.clone()];
        for pending in filter.pending_incoming() {
            remaining = remaining
                .into_iter()
                .flat_map(|piece| subtract(&piece, pending))
                .collect();
        }
        pieces.extend(remaining);
    }

    // Join pieces that touch.
    let mut merged: Vec<ChunkRange> = Vec::new();
    for piece in pieces {
        match merged.last_mut() {
            Some(last) if last.max == piece.min => last.max = piece.max,
            _ => merged.push(piece),
        }
    }
    merged
}

fn subtract(range: &ChunkRange, hole: &ChunkRange) -> Vec<ChunkRange> {
    if !range.overlaps(hole) {
        return vec![range.clone()];
    }
    [
        ChunkRange::try_new(range.min.clone(), hole.min.clone()),
        ChunkRange::try_new(hole.max.clone(), range.max.clone()),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Asserts that `checker` found no violations.
///
/// # Panics
///
/// Panics with every violation listed if any were found.
pub fn assert_no_violations(checker: &PropertyChecker, context: &str) {
    if checker.is_ok() {
        return;
    }
    let report: Vec<String> = checker.violations().iter().map(ToString::to_string).collect();
    panic!(
        "{context}: {} violation(s) after {} table(s):\n  {}",
        report.len(),
        checker.tables_checked(),
        report.join("\n  ")
    );
}
