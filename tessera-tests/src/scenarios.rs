//! Reusable routing table scenarios.
//!
//! Tables are laid out the same way throughout the tests: chunk `i` of `n`
//! covers `[(i - 1) * 100, i * 100)`, with the first chunk starting at `Min`
//! and the last ending at `Max`. Chunk `i` carries major version `i + 1`.
//! Shards are assigned by a [`ShardSelector`].

use std::collections::BTreeSet;

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::Rng;
use tessera_core::{
    ChunkRange, ChunkVersion, CollectionEpoch, RangeBound, ShardId, ShardKey, ShardKeyPattern,
};
use tessera_routing::{ChunkEntry, RoutingTable};
use tracing_subscriber::EnvFilter;

/// Epoch used by scenarios unless a test recreates the collection.
pub const EPOCH: CollectionEpoch = CollectionEpoch::new(1);

/// Distance between consecutive chunk bounds.
pub const CHUNK_WIDTH: u64 = 100;

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Seed used to shuffle diffs, so that diff order never matters.
    pub const SHUFFLE_SEED: u64 = 456;
}

/// Picks the owner of chunk `index` out of `chunk_count`, given
/// `shard_count` shards.
pub type ShardSelector = fn(u64, u64, u64) -> ShardId;

/// Returns the shard with the given ordinal.
#[must_use]
pub const fn shard(ordinal: u64) -> ShardId {
    ShardId::new(ordinal)
}

/// Round-robin placement: neighbouring chunks never share a shard.
#[must_use]
pub const fn pessimal_shard(index: u64, shard_count: u64, _chunk_count: u64) -> ShardId {
    shard(index % shard_count)
}

/// Contiguous placement: each shard owns one run of chunks.
#[must_use]
pub const fn optimal_shard(index: u64, shard_count: u64, chunk_count: u64) -> ShardId {
    assert!(shard_count <= chunk_count);
    shard((index * shard_count / chunk_count) % shard_count)
}

/// Returns the key range of chunk `index` out of `chunk_count`.
///
/// # Panics
///
/// Panics if `index >= chunk_count`.
#[must_use]
pub fn range_for_chunk(index: u64, chunk_count: u64) -> ChunkRange {
    assert!(index < chunk_count, "chunk {index} out of {chunk_count}");
    let min = if index == 0 {
        RangeBound::Min
    } else {
        RangeBound::from((index - 1) * CHUNK_WIDTH)
    };
    let max = if index == chunk_count - 1 {
        RangeBound::Max
    } else {
        RangeBound::from(index * CHUNK_WIDTH)
    };
    ChunkRange::new(min, max)
}

/// Builds the chunk list of a `chunk_count`-chunk collection.
#[must_use]
pub fn chunks_with_selector(
    shard_count: u64,
    chunk_count: u64,
    selector: ShardSelector,
) -> Vec<ChunkEntry> {
    (0..chunk_count)
        .map(|index| {
            ChunkEntry::new(
                range_for_chunk(index, chunk_count),
                ChunkVersion::new(EPOCH, index + 1, 0),
                selector(index, shard_count, chunk_count),
            )
        })
        .collect()
}

/// Builds a routing table with the given placement.
///
/// # Panics
///
/// Panics if the scenario chunk list does not build, which would be a bug
/// in the scenario itself.
#[must_use]
pub fn table_with_selector(
    shard_count: u64,
    chunk_count: u64,
    selector: ShardSelector,
) -> RoutingTable {
    RoutingTable::build(
        EPOCH,
        ShardKeyPattern::Ranged,
        chunks_with_selector(shard_count, chunk_count, selector),
    )
    .expect("scenario chunks must build")
}

/// Moves `updates` equally spaced chunks to the next shard over.
///
/// Each moved chunk gets a fresh major version above the table's
/// collection version. The diff is returned shuffled.
#[must_use]
pub fn spaced_moves(
    table: &RoutingTable,
    shard_count: u64,
    updates: usize,
    rng: &mut impl Rng,
) -> Vec<ChunkEntry> {
    let chunks: Vec<&ChunkEntry> = table.chunks().map(|chunk| &**chunk).collect();
    let spacing = (chunks.len() / updates.max(1)).max(1);
    let mut version = table.collection_version();

    let mut diff: Vec<ChunkEntry> = chunks
        .iter()
        .step_by(spacing)
        .take(updates)
        .map(|chunk| {
            version = version.inc_major();
            ChunkEntry::new(
                chunk.range.clone(),
                version,
                shard((chunk.shard.get() + 1) % shard_count),
            )
        })
        .collect();
    diff.shuffle(rng);
    diff
}

/// Merges every maximal run of adjacent chunks owned by one of `shards`
/// into a single chunk.
///
/// Runs of a single chunk are left alone. The diff is returned shuffled.
#[must_use]
pub fn merge_shard_runs(
    table: &RoutingTable,
    shards: &BTreeSet<ShardId>,
    rng: &mut impl Rng,
) -> Vec<ChunkEntry> {
    let mut version = table.collection_version();
    let mut diff = Vec::new();
    let mut run: Vec<&ChunkEntry> = Vec::new();

    for chunk in table.chunks() {
        let same_run = run.last().is_some_and(|last| last.shard == chunk.shard);
        if !same_run {
            flush_merge_run(&mut run, &mut diff, &mut version);
        }
        if shards.contains(&chunk.shard) {
            run.push(chunk);
        }
    }
    flush_merge_run(&mut run, &mut diff, &mut version);

    diff.shuffle(rng);
    diff
}

fn flush_merge_run(
    run: &mut Vec<&ChunkEntry>,
    diff: &mut Vec<ChunkEntry>,
    version: &mut ChunkVersion,
) {
    if let (Some(first), Some(last)) = (run.first(), run.last()) {
        if run.len() > 1 {
            *version = version.inc_minor();
            diff.push(ChunkEntry::new(
                ChunkRange::new(first.range.min.clone(), last.range.max.clone()),
                *version,
                first.shard,
            ));
        }
    }
    run.clear();
}

/// Returns a random key in the scenario key space, including keys below
/// the first and above the last chunk bound.
#[must_use]
pub fn random_key(rng: &mut impl Rng, chunk_count: u64) -> RangeBound {
    let span = (chunk_count + 1) * CHUNK_WIDTH;
    RangeBound::from(rng.gen_range(0..span))
}

/// Installs a test log subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns the integer value of a scenario key bound.
///
/// `Min` and `Max` map to the ends of the `u64` range; keys that are not
/// eight bytes long yield `None`.
#[must_use]
pub fn key_value(bound: &RangeBound) -> Option<u64> {
    match bound {
        RangeBound::Min => Some(0),
        RangeBound::Max => Some(u64::MAX),
        RangeBound::Key(key) => {
            let bytes: [u8; 8] = (&key.as_bytes()[..]).try_into().ok()?;
            Some(u64::from_be_bytes(bytes))
        }
    }
}

/// Returns a bound for a string shard key.
#[must_use]
pub fn string_bound(key: &str) -> RangeBound {
    RangeBound::Key(ShardKey::new(Bytes::copy_from_slice(key.as_bytes())))
}
