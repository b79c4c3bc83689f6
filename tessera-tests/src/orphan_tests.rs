//! Orphan range and ownership tests.
//!
//! Every shard's orphan enumeration is compared against a brute-force
//! computation, over fixed layouts and over tables shaped by random catalog
//! changes with random pending migrations.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_core::{ChunkRange, ChunkVersion, Limits, RangeBound, ShardKeyPattern};
use tessera_routing::{OwnershipFilter, RoutingTable, RoutingTableView};

use crate::properties::{assert_no_violations, PropertyChecker};
use crate::scenarios::{
    chunks_with_selector, key_value, optimal_shard, pessimal_shard, random_key, range_for_chunk,
    seeds, shard, table_with_selector, CHUNK_WIDTH, EPOCH,
};
use crate::simulated_catalog::SimulatedCatalog;

fn view(table: RoutingTable) -> RoutingTableView {
    RoutingTableView::new(Arc::new(table))
}

fn random_pending(rng: &mut StdRng, chunk_count: u64, count: usize) -> Vec<ChunkRange> {
    (0..count)
        .filter_map(|_| {
            let a = random_key(rng, chunk_count);
            let b = random_key(rng, chunk_count);
            ChunkRange::try_new(a.clone().min(b.clone()), a.max(b))
        })
        .collect()
}

#[test]
fn test_orphans_pessimal_layout() {
    let view = view(table_with_selector(4, 100, pessimal_shard));
    let mut checker = PropertyChecker::new();

    for ordinal in 0..4 {
        let filter = OwnershipFilter::new(view.clone(), shard(ordinal), []);
        checker.check_orphans(&filter);
    }

    // Shard 0 owns every fourth chunk starting with the first, leaving 25
    // runs of three foreign chunks.
    let filter = OwnershipFilter::new(view, shard(0), []);
    let orphans: Vec<ChunkRange> = filter.orphan_ranges().collect();
    assert_eq!(orphans.len(), 25);
    assert_eq!(orphans[0], ChunkRange::new(0_u64, 300_u64));
    assert_eq!(orphans[24].max, RangeBound::Max);

    assert_no_violations(&checker, "orphans_pessimal_layout");
}

#[test]
fn test_orphans_optimal_layout() {
    let view = view(table_with_selector(4, 100, optimal_shard));
    let filter = OwnershipFilter::new(view, shard(1), []);

    let orphans: Vec<ChunkRange> = filter.orphan_ranges().collect();
    assert_eq!(
        orphans,
        vec![
            ChunkRange::new(RangeBound::Min, RangeBound::from(2_400_u64)),
            ChunkRange::new(RangeBound::from(4_900_u64), RangeBound::Max),
        ]
    );

    // Resuming from inside an orphan range yields its remainder.
    assert_eq!(
        filter.next_orphan_range(&RangeBound::from(1_000_u64)),
        Some(ChunkRange::new(1_000_u64, 2_400_u64))
    );
    // Resuming from inside an owned run skips to the next orphan.
    assert_eq!(
        filter.next_orphan_range(&RangeBound::from(3_000_u64)),
        Some(ChunkRange::new(RangeBound::from(4_900_u64), RangeBound::Max))
    );
}

#[test]
fn test_orphans_exclude_pending_migrations() {
    let view = view(table_with_selector(4, 100, optimal_shard));
    // Shard 1 is receiving chunk 60 and part of chunk 10.
    let pending = vec![range_for_chunk(60, 100), ChunkRange::new(950_u64, 1_000_u64)];
    let filter = OwnershipFilter::new(view, shard(1), pending);

    let orphans: Vec<ChunkRange> = filter.orphan_ranges().collect();
    assert_eq!(
        orphans,
        vec![
            ChunkRange::new(RangeBound::Min, RangeBound::from(950_u64)),
            ChunkRange::new(1_000_u64, 2_400_u64),
            ChunkRange::new(4_900_u64, 5_900_u64),
            ChunkRange::new(RangeBound::from(6_000_u64), RangeBound::Max),
        ]
    );
    assert!(filter.is_pending_incoming(&RangeBound::from(5_950_u64)));
    assert!(!filter.is_owned_by_local_shard(&RangeBound::from(5_950_u64)));

    let mut checker = PropertyChecker::new();
    checker.check_orphans(&filter);
    assert_no_violations(&checker, "orphans_exclude_pending");
}

#[test]
fn test_orphans_random_tables() {
    const SHARDS: u64 = 4;
    const CHUNKS: u64 = 60;

    for &seed in seeds::REGRESSION_SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let catalog = SimulatedCatalog::new(
            EPOCH,
            ShardKeyPattern::Ranged,
            chunks_with_selector(SHARDS, CHUNKS, pessimal_shard),
        );
        for _ in 0..100 {
            catalog.apply_random_op(&mut rng, SHARDS);
        }
        let table = RoutingTable::build(EPOCH, ShardKeyPattern::Ranged, catalog.chunks()).unwrap();
        let view = view(table);
        let mut checker = PropertyChecker::new();

        for ordinal in 0..SHARDS {
            let pending_count = rng.gen_range(0..6);
            let pending = random_pending(&mut rng, CHUNKS, pending_count);
            let filter = OwnershipFilter::new(view.clone(), shard(ordinal), pending);
            checker.check_orphans(&filter);

            for orphan in filter.orphan_ranges() {
                assert!(!filter.is_owned_by_local_shard(&orphan.min), "seed {seed}: {orphan}");
                assert!(!filter.is_pending_incoming(&orphan.min), "seed {seed}: {orphan}");
                assert!(!filter.range_overlaps_owned_chunk(&orphan), "seed {seed}: {orphan}");
            }
        }

        assert_no_violations(&checker, &format!("orphans_random_tables_seed_{seed}"));
    }
}

#[test]
fn test_ownership_queries_match_linear_scan() {
    for &seed in &seeds::REGRESSION_SEEDS[..3] {
        let mut rng = StdRng::seed_from_u64(seed);
        let view = view(table_with_selector(3, 90, pessimal_shard));
        let local = shard(rng.gen_range(0..3));
        let filter = OwnershipFilter::new(view.clone(), local, []);

        let owned = filter.owned_chunks().count();
        assert_eq!(owned, view.table().shard_chunk_count(local));
        assert!(filter.owned_chunks().all(|chunk| chunk.shard == local));

        for _ in 0..200 {
            let key = random_key(&mut rng, 90);
            let expected = view.chunks().any(|c| c.shard == local && c.range.contains(&key));
            assert_eq!(filter.is_owned_by_local_shard(&key), expected, "key {key}");

            let width = rng.gen_range(1..=3 * CHUNK_WIDTH);
            let range = ChunkRange::new(key.clone(), key_plus(&key, width));
            let expected = view
                .chunks()
                .any(|c| c.shard == local && c.range.overlaps(&range));
            assert_eq!(filter.range_overlaps_owned_chunk(&range), expected, "range {range}");
        }
    }
}

fn key_plus(key: &RangeBound, delta: u64) -> RangeBound {
    let value = key_value(key).unwrap_or(0);
    RangeBound::from(value + delta)
}

#[test]
fn test_local_shard_version() {
    let view = view(table_with_selector(4, 100, optimal_shard));

    let owner = OwnershipFilter::new(view.clone(), shard(2), []);
    assert_eq!(owner.local_shard_version(), ChunkVersion::new(EPOCH, 75, 0));

    let stranger = OwnershipFilter::new(view, shard(9), []);
    assert_eq!(stranger.local_shard_version(), ChunkVersion::zero(EPOCH));
    assert_eq!(stranger.owned_chunks().count(), 0);
    assert_eq!(
        stranger.next_orphan_range(&RangeBound::Min),
        Some(ChunkRange::full())
    );
}

#[test]
fn test_pending_limit() {
    let view = view(table_with_selector(4, 100, optimal_shard));
    let limits = Limits::new();
    let pending: Vec<ChunkRange> = (0..=limits.max_pending_incoming_ranges)
        .map(|i| ChunkRange::new(i * 10, i * 10 + 5))
        .collect();

    assert!(OwnershipFilter::with_limits(view.clone(), shard(0), pending, &limits).is_err());
    let within = [range_for_chunk(3, 100)];
    assert!(OwnershipFilter::with_limits(view, shard(0), within, &limits).is_ok());
}
