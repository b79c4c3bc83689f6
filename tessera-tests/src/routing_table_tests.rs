//! Routing table integration tests.
//!
//! These build tables in the layouts used throughout the suite, push diffs
//! through them, and check every resulting table against the property
//! checkers. Diffs are always applied in shuffled order.

#![allow(clippy::cast_possible_truncation)] // u64 to usize safe on 64-bit test machines
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tessera_core::{ChunkRange, ChunkVersion, CollectionEpoch, RangeBound, ShardKeyPattern};
use tessera_routing::{ChunkEntry, RoutingTable, RoutingTableView, UpdateError};

use crate::properties::{assert_no_violations, PropertyChecker};
use crate::scenarios::{
    chunks_with_selector, init_tracing, merge_shard_runs, optimal_shard, pessimal_shard,
    random_key, seeds, shard, spaced_moves, string_bound, table_with_selector, EPOCH,
};
use crate::simulated_catalog::SimulatedCatalog;

/// Rebuilds `table` from scratch with `diff` spliced in, as the catalog
/// would describe it after the change.
fn rebuild_with(table: &RoutingTable, diff: &[ChunkEntry]) -> RoutingTable {
    let mut chunks: Vec<ChunkEntry> = table
        .chunks()
        .filter(|chunk| !diff.iter().any(|entry| entry.range.overlaps(&chunk.range)))
        .map(|chunk| (**chunk).clone())
        .collect();
    chunks.extend(diff.iter().cloned());
    RoutingTable::build(table.epoch(), table.key_pattern(), chunks).unwrap()
}

fn random_keys(rng: &mut StdRng, chunk_count: u64, count: usize) -> Vec<RangeBound> {
    let mut keys: Vec<RangeBound> = (0..count).map(|_| random_key(rng, chunk_count)).collect();
    keys.push(RangeBound::Min);
    keys
}

#[test]
fn test_routing_table_single_chunk() {
    let table = Arc::new(table_with_selector(1, 1, optimal_shard));
    let view = RoutingTableView::new(Arc::clone(&table));

    assert_eq!(table.chunk_count(), 1);
    assert_eq!(table.find_owner(&RangeBound::Min).range, ChunkRange::full());
    assert_eq!(view.shard_for_key(&RangeBound::from(u64::MAX)).unwrap(), shard(0));
    assert_eq!(view.all_shards().unwrap(), BTreeSet::from([shard(0)]));
    assert_eq!(table.collection_version(), ChunkVersion::new(EPOCH, 1, 0));

    let mut checker = PropertyChecker::new();
    checker.check_table(&table);
    assert_no_violations(&checker, "single_chunk");
}

#[test]
fn test_routing_table_four_shards_optimal() {
    let table = Arc::new(table_with_selector(4, 100, optimal_shard));
    let view = RoutingTableView::new(Arc::clone(&table));

    assert_eq!(table.chunk_count(), 100);
    assert_eq!(
        view.shards_for_range(&RangeBound::Min, &RangeBound::Max).unwrap(),
        (0..4).map(shard).collect::<BTreeSet<_>>()
    );
    // Chunks 0..25 live on shard 0, so keys below 2_400 do too.
    assert_eq!(
        view.shards_for_range(&RangeBound::Min, &RangeBound::from(2_400_u64)).unwrap(),
        BTreeSet::from([shard(0)])
    );
    assert_eq!(
        view.shards_for_range(&RangeBound::from(2_350_u64), &RangeBound::from(2_450_u64))
            .unwrap(),
        BTreeSet::from([shard(0), shard(1)])
    );
    for ordinal in 0..4 {
        assert_eq!(table.shard_chunk_count(shard(ordinal)), 25);
    }
    assert_eq!(table.shard_version(shard(3)), Some(ChunkVersion::new(EPOCH, 100, 0)));

    let mut rng = StdRng::seed_from_u64(seeds::REGRESSION_SEEDS[0]);
    let mut checker = PropertyChecker::new();
    checker.check_table(&table);
    checker.check_lookups(&table, &random_keys(&mut rng, 100, 500));
    assert_no_violations(&checker, "four_shards_optimal");
}

#[test]
fn test_routing_table_pessimal_scan_stops_early() {
    let table = Arc::new(table_with_selector(4, 10_000, pessimal_shard));
    let view = RoutingTableView::new(table);

    // Four neighbouring chunks already name every shard.
    let shards = view
        .shards_for_range(&RangeBound::from(0_u64), &RangeBound::from(500_000_u64))
        .unwrap();
    assert_eq!(shards.len(), 4);
}

#[test]
fn test_routing_table_merge_scenario() {
    let (a, b, c) = (shard(0), shard(1), shard(2));
    let table = RoutingTable::build(
        EPOCH,
        ShardKeyPattern::Ranged,
        vec![
            ChunkEntry::new(
                ChunkRange::new(RangeBound::Min, RangeBound::from(0_u64)),
                ChunkVersion::new(EPOCH, 1, 0),
                c,
            ),
            ChunkEntry::new(ChunkRange::new(0_u64, 100_u64), ChunkVersion::new(EPOCH, 2, 0), a),
            ChunkEntry::new(ChunkRange::new(100_u64, 200_u64), ChunkVersion::new(EPOCH, 3, 0), b),
            ChunkEntry::new(
                ChunkRange::new(RangeBound::from(200_u64), RangeBound::Max),
                ChunkVersion::new(EPOCH, 4, 0),
                c,
            ),
        ],
    )
    .unwrap();

    let merged = ChunkEntry::new(
        ChunkRange::new(0_u64, 200_u64),
        ChunkVersion::new(EPOCH, 5, 0),
        a,
    );
    let updated = table.apply_diff([merged]).unwrap();

    assert_eq!(updated.chunk_count(), 3);
    assert_eq!(updated.find_owner(&RangeBound::from(150_u64)).shard, a);
    assert!(!updated.has_shard(b));
    assert_eq!(updated.shard_version(b), None);
    assert_eq!(updated.shard_version(a), Some(ChunkVersion::new(EPOCH, 5, 0)));

    let mut checker = PropertyChecker::new();
    checker.check_update(&table, &updated);
    assert_no_violations(&checker, "merge_scenario");
}

#[test]
fn test_routing_table_epoch_change_rejected() {
    let table = table_with_selector(4, 100, optimal_shard);
    let recreated = CollectionEpoch::new(2);

    let err = table
        .apply_diff([ChunkEntry::new(
            ChunkRange::full(),
            ChunkVersion::new(recreated, 1, 0),
            shard(0),
        )])
        .unwrap_err();

    assert_eq!(
        err,
        UpdateError::EpochChanged {
            current: EPOCH,
            received: recreated,
        }
    );
    assert!(err.requires_full_rebuild());
}

#[test]
fn test_routing_table_spaced_moves() {
    init_tracing();
    let table = table_with_selector(4, 1_000, pessimal_shard);
    let mut rng = StdRng::seed_from_u64(seeds::SHUFFLE_SEED);
    let mut checker = PropertyChecker::new();

    for updates in [1, 10, 100, 1_000] {
        let diff = spaced_moves(&table, 4, updates, &mut rng);
        let updated = table.apply_diff(diff.clone()).unwrap();

        assert_eq!(updated, rebuild_with(&table, &diff), "{updates} moves");
        assert_eq!(updated.chunk_count(), 1_000);
        checker.check_update(&table, &updated);
        checker.check_lookups(&updated, &random_keys(&mut rng, 1_000, 200));
    }
    assert_no_violations(&checker, "spaced_moves");
}

#[test]
fn test_routing_table_spaced_merges() {
    let table = table_with_selector(4, 1_000, optimal_shard);
    let mut rng = StdRng::seed_from_u64(seeds::SHUFFLE_SEED);
    let mut checker = PropertyChecker::new();

    for merged_shards in 1..=4 {
        let shards: BTreeSet<_> = (0..merged_shards).map(shard).collect();
        let diff = merge_shard_runs(&table, &shards, &mut rng);
        assert_eq!(diff.len() as u64, merged_shards);

        let updated = table.apply_diff(diff.clone()).unwrap();
        let expected_chunks = 1_000 - (merged_shards as usize) * 249;
        assert_eq!(updated.chunk_count(), expected_chunks);
        assert_eq!(updated, rebuild_with(&table, &diff));
        for ordinal in 0..merged_shards {
            assert_eq!(updated.shard_chunk_count(shard(ordinal)), 1);
        }
        checker.check_update(&table, &updated);
    }
    assert_no_violations(&checker, "spaced_merges");
}

#[test]
fn test_routing_table_noop_diff_shares_everything() {
    let table = table_with_selector(4, 100, pessimal_shard);
    let diff: Vec<ChunkEntry> = table.chunks().step_by(7).map(|chunk| (**chunk).clone()).collect();

    let updated = table.apply_diff(diff).unwrap();

    assert_eq!(updated, table);
    for (old, new) in table.chunks().zip(updated.chunks()) {
        assert!(Arc::ptr_eq(old, new), "chunk {} was copied", new.range);
    }
}

#[test]
fn test_routing_table_diff_order_irrelevant() {
    let table = table_with_selector(4, 500, pessimal_shard);
    let mut rng = StdRng::seed_from_u64(seeds::REGRESSION_SEEDS[1]);
    let diff = spaced_moves(&table, 4, 50, &mut rng);

    let mut reversed = diff.clone();
    reversed.reverse();
    let mut shuffled = diff.clone();
    shuffled.shuffle(&mut rng);

    let expected = table.apply_diff(diff).unwrap();
    assert_eq!(table.apply_diff(reversed).unwrap(), expected);
    assert_eq!(table.apply_diff(shuffled).unwrap(), expected);
}

#[test]
fn test_routing_table_string_keys() {
    let chunks = vec![
        ChunkEntry::new(
            ChunkRange::new(RangeBound::Min, string_bound("g")),
            ChunkVersion::new(EPOCH, 1, 0),
            shard(0),
        ),
        ChunkEntry::new(
            ChunkRange::new(string_bound("g"), string_bound("p")),
            ChunkVersion::new(EPOCH, 1, 1),
            shard(1),
        ),
        ChunkEntry::new(
            ChunkRange::new(string_bound("p"), RangeBound::Max),
            ChunkVersion::new(EPOCH, 1, 2),
            shard(2),
        ),
    ];
    let table = RoutingTable::build(EPOCH, ShardKeyPattern::Ranged, chunks).unwrap();

    assert_eq!(table.find_owner(&string_bound("apple")).shard, shard(0));
    assert_eq!(table.find_owner(&string_bound("g")).shard, shard(1));
    assert_eq!(table.find_owner(&string_bound("grape")).shard, shard(1));
    assert_eq!(table.find_owner(&string_bound("p")).shard, shard(2));
    assert_eq!(table.find_owner(&string_bound("zebra")).shard, shard(2));
}

#[test]
fn test_routing_table_random_catalog_changes() {
    init_tracing();
    const ROUNDS: usize = 40;
    const CHUNKS: u64 = 50;
    const SHARDS: u64 = 4;

    for &seed in seeds::REGRESSION_SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let catalog = SimulatedCatalog::new(
            EPOCH,
            ShardKeyPattern::Ranged,
            chunks_with_selector(SHARDS, CHUNKS, pessimal_shard),
        );
        let mut table = RoutingTable::build(EPOCH, ShardKeyPattern::Ranged, catalog.chunks())
            .unwrap();
        let mut checker = PropertyChecker::new();

        for round in 0..ROUNDS {
            let ops = rng.gen_range(1..=5);
            for _ in 0..ops {
                catalog.apply_random_op(&mut rng, SHARDS);
            }

            let mut diff = catalog.chunks();
            diff.retain(|chunk| chunk.version.placement() > table.collection_version().placement());
            if diff.is_empty() {
                continue;
            }
            diff.shuffle(&mut rng);

            let updated = table
                .apply_diff(diff)
                .unwrap_or_else(|err| panic!("seed {seed} round {round}: {err}"));
            let rebuilt =
                RoutingTable::build(EPOCH, ShardKeyPattern::Ranged, catalog.chunks()).unwrap();
            assert_eq!(updated, rebuilt, "seed {seed} round {round}");

            checker.check_update(&table, &updated);
            checker.check_lookups(&updated, &random_keys(&mut rng, CHUNKS, 50));
            table = updated;
        }

        assert_no_violations(&checker, &format!("random_catalog_changes_seed_{seed}"));
    }
}
