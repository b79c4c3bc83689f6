//! Simulated catalog for refresh tests.
//!
//! Holds an authoritative chunk list and mutates it the way a config server
//! would: splits and merges bump the minor version, migrations bump the
//! major version, and every change is stamped on a logical clock so that
//! chunk placement history stays queryable. Diffs are served as "every chunk
//! newer than the caller's version", the same contract a real catalog
//! offers.

use std::sync::Mutex;

use rand::Rng;
use tessera_core::{
    ChunkRange, ChunkVersion, CollectionEpoch, LogicalTime, RangeBound, ShardId, ShardKeyPattern,
};
use tessera_routing::{CatalogError, CatalogSnapshot, CatalogSource, ChunkEntry, ChunkHistory};
use tracing::trace;

use crate::scenarios::key_value;

/// A catalog change applied by [`SimulatedCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogOp {
    /// A chunk was split in two.
    Split {
        /// The range that was split.
        range: ChunkRange,
        /// The split point.
        at: RangeBound,
    },
    /// A chunk migrated to another shard.
    Move {
        /// The range that moved.
        range: ChunkRange,
        /// The recipient shard.
        to: ShardId,
    },
    /// Adjacent chunks on one shard were merged.
    Merge {
        /// The merged range.
        range: ChunkRange,
    },
    /// The randomly chosen change was not applicable.
    Skipped,
}

#[derive(Debug)]
struct CatalogState {
    epoch: CollectionEpoch,
    key_pattern: ShardKeyPattern,
    /// Sorted by `range.min`.
    chunks: Vec<ChunkEntry>,
    version: ChunkVersion,
    clock: LogicalTime,
    failures_remaining: u32,
    dropped: bool,
}

impl CatalogState {
    fn tick(&mut self) -> LogicalTime {
        self.clock = self.clock.next();
        self.clock
    }

    fn check_available(&mut self) -> Result<(), CatalogError> {
        if self.dropped {
            return Err(CatalogError::CollectionNotFound);
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(CatalogError::Unavailable {
                message: "simulated catalog outage".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory catalog that tests mutate between refreshes.
#[derive(Debug)]
pub struct SimulatedCatalog {
    state: Mutex<CatalogState>,
}

impl SimulatedCatalog {
    /// Creates a catalog holding `chunks`.
    ///
    /// Every chunk is given a single history record at time zero.
    #[must_use]
    pub fn new(
        epoch: CollectionEpoch,
        key_pattern: ShardKeyPattern,
        chunks: Vec<ChunkEntry>,
    ) -> Self {
        Self {
            state: Mutex::new(Self::initial_state(epoch, key_pattern, chunks)),
        }
    }

    fn initial_state(
        epoch: CollectionEpoch,
        key_pattern: ShardKeyPattern,
        chunks: Vec<ChunkEntry>,
    ) -> CatalogState {
        let mut chunks: Vec<ChunkEntry> = chunks
            .into_iter()
            .map(|chunk| {
                let placement = ChunkHistory::new(LogicalTime::new(0), chunk.shard);
                chunk.with_history([placement])
            })
            .collect();
        chunks.sort_by(|a, b| a.range.min.cmp(&b.range.min));
        let version = chunks
            .iter()
            .map(|chunk| chunk.version)
            .fold(ChunkVersion::zero(epoch), ChunkVersion::max_of);

        CatalogState {
            epoch,
            key_pattern,
            chunks,
            version,
            clock: LogicalTime::new(0),
            failures_remaining: 0,
            dropped: false,
        }
    }

    /// Drops and recreates the collection under `epoch`.
    pub fn recreate(&self, epoch: CollectionEpoch, chunks: Vec<ChunkEntry>) {
        let mut state = self.state.lock().expect("lock poisoned");
        let key_pattern = state.key_pattern;
        let clock = state.clock;
        *state = Self::initial_state(epoch, key_pattern, chunks);
        state.clock = clock;
    }

    /// Drops the collection; fetches report it missing until `recreate`.
    pub fn drop_collection(&self) {
        self.state.lock().expect("lock poisoned").dropped = true;
    }

    /// Makes the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().expect("lock poisoned").failures_remaining = count;
    }

    /// Returns the authoritative chunk list, sorted by range.
    #[must_use]
    pub fn chunks(&self) -> Vec<ChunkEntry> {
        self.state.lock().expect("lock poisoned").chunks.clone()
    }

    /// Returns the number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").chunks.len()
    }

    /// Returns the highest version handed out so far.
    #[must_use]
    pub fn collection_version(&self) -> ChunkVersion {
        self.state.lock().expect("lock poisoned").version
    }

    /// Returns the current logical time.
    #[must_use]
    pub fn now(&self) -> LogicalTime {
        self.state.lock().expect("lock poisoned").clock
    }

    /// Splits chunk `index` at `at`.
    ///
    /// Both halves keep the owner and history and get new minor versions.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds or `at` is not strictly inside
    /// the chunk.
    pub fn split(&self, index: usize, at: RangeBound) -> CatalogOp {
        let mut state = self.state.lock().expect("lock poisoned");
        let chunk = state.chunks[index].clone();
        assert!(
            chunk.range.min < at && at < chunk.range.max,
            "split point {at} outside {}",
            chunk.range
        );
        state.tick();

        let mut halves = Vec::with_capacity(2);
        for range in [
            ChunkRange::new(chunk.range.min.clone(), at.clone()),
            ChunkRange::new(at.clone(), chunk.range.max.clone()),
        ] {
            state.version = state.version.inc_minor();
            halves.push(
                ChunkEntry::new(range, state.version, chunk.shard)
                    .with_history(chunk.history().iter().copied()),
            );
        }
        state.chunks.splice(index..=index, halves);

        trace!(range = %chunk.range, at = %at, "Simulated split");
        CatalogOp::Split {
            range: chunk.range,
            at,
        }
    }

    /// Migrates chunk `index` to `to`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn move_chunk(&self, index: usize, to: ShardId) -> CatalogOp {
        let mut state = self.state.lock().expect("lock poisoned");
        let chunk = state.chunks[index].clone();
        if chunk.shard == to {
            return CatalogOp::Skipped;
        }
        let now = state.tick();
        state.version = state.version.inc_major();

        let history = std::iter::once(ChunkHistory::new(now, to))
            .chain(chunk.history().iter().copied());
        state.chunks[index] =
            ChunkEntry::new(chunk.range.clone(), state.version, to).with_history(history);

        trace!(range = %chunk.range, from = %chunk.shard, to = %to, "Simulated migration");
        CatalogOp::Move {
            range: chunk.range,
            to,
        }
    }

    /// Merges chunks `index` and `index + 1` if they share an owner.
    ///
    /// The merged chunk's history restarts at the merge.
    ///
    /// # Panics
    ///
    /// Panics if `index + 1` is out of bounds.
    pub fn merge(&self, index: usize) -> CatalogOp {
        let mut state = self.state.lock().expect("lock poisoned");
        let (left, right) = (state.chunks[index].clone(), state.chunks[index + 1].clone());
        if left.shard != right.shard {
            return CatalogOp::Skipped;
        }
        let now = state.tick();
        state.version = state.version.inc_minor();

        let range = ChunkRange::new(left.range.min, right.range.max);
        let merged = ChunkEntry::new(range.clone(), state.version, left.shard)
            .with_history([ChunkHistory::new(now, left.shard)]);
        state.chunks.splice(index..=index + 1, [merged]);

        trace!(range = %range, "Simulated merge");
        CatalogOp::Merge { range }
    }

    /// Applies one random split, migration, or merge.
    pub fn apply_random_op(&self, rng: &mut impl Rng, shard_count: u64) -> CatalogOp {
        let count = self.chunk_count();
        let index = rng.gen_range(0..count);

        match rng.gen_range(0..3) {
            0 => {
                let range = self.state.lock().expect("lock poisoned").chunks[index].range.clone();
                match split_point(&range, rng) {
                    Some(at) => self.split(index, at),
                    None => CatalogOp::Skipped,
                }
            }
            1 => self.move_chunk(index, ShardId::new(rng.gen_range(0..shard_count))),
            _ if index + 1 < count => self.merge(index),
            _ => CatalogOp::Skipped,
        }
    }
}

/// Picks a key strictly inside `range`, if one exists.
fn split_point(range: &ChunkRange, rng: &mut impl Rng) -> Option<RangeBound> {
    let lo = key_value(&range.min)?;
    let hi = key_value(&range.max)?;
    // `Min` sorts below key zero, so zero itself is a valid split point.
    let first = if range.min.is_min() { lo } else { lo.checked_add(1)? };
    if first >= hi && !range.max.is_max() {
        return None;
    }
    let value = if range.max.is_max() {
        rng.gen_range(first..=first.saturating_add(1_000))
    } else {
        rng.gen_range(first..hi)
    };
    Some(RangeBound::from(value))
}

impl CatalogSource for SimulatedCatalog {
    fn fetch_full_chunk_list(&self) -> Result<CatalogSnapshot, CatalogError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.check_available()?;
        Ok(CatalogSnapshot {
            epoch: state.epoch,
            key_pattern: state.key_pattern,
            chunks: state.chunks.clone(),
        })
    }

    fn fetch_diff_since(&self, since: ChunkVersion) -> Result<Vec<ChunkEntry>, CatalogError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.check_available()?;
        if since.epoch != state.epoch {
            return Ok(state.chunks.clone());
        }
        Ok(state
            .chunks
            .iter()
            .filter(|chunk| chunk.version.placement() > since.placement())
            .cloned()
            .collect())
    }
}
