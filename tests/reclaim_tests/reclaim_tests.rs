//! Tests for history reclamation
//!
//! These tests verify:
//! - Superseded payloads are released once no snapshot can reach them
//! - Pinned history survives until the last pin is released
//! - Every payload is released exactly once
//! - Index blocks are freed only after their last snapshot

#[path = "../common/mod.rs"]
mod common;

use common::*;
use vstore::{Config, Storage, WriteBatch};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_storage_without_release_reclaim() -> (Storage<CountingBehavior>, std::sync::Arc<Counters>) {
    let behavior = CountingBehavior::new();
    let counters = behavior.counters();
    let config = Config::builder().reclaim_on_release(false).build();
    (Storage::with_config(behavior, config).unwrap(), counters)
}

// =============================================================================
// Trim Tests
// =============================================================================

#[test]
fn test_overwrite_without_snapshots_releases_old_payload() {
    let (storage, counters) = setup_storage();

    storage.put(key("k"), 1, value("a")).unwrap();
    assert_eq!(counters.released(), 0);

    storage.put(key("k"), 1, value("b")).unwrap();
    assert_eq!(counters.released(), 1);
    assert_eq!(storage.stats().pending_trims, 0);
    assert_eq!(storage.snapshot().get(&key("k"), 1).payload(), Some(&value("b")));
}

#[test]
fn test_delete_without_snapshots_releases_payload() {
    let (storage, counters) = setup_storage();
    for subkey in 0..4 {
        storage.put(key("k"), subkey, value("v")).unwrap();
    }

    storage.delete_key(key("k")).unwrap();
    assert_eq!(counters.released(), 4);
}

#[test]
fn test_pinned_history_survives_until_release() {
    let (storage, counters) = setup_storage();
    storage.put(key("k"), 1, value("a")).unwrap();
    let pinned = storage.snapshot();

    for n in 0..10 {
        storage.put(key("k"), 1, format!("v{n}")).unwrap();
    }
    assert_eq!(counters.released(), 0);
    assert_eq!(storage.stats().pending_trims, 10);
    assert_eq!(pinned.get(&key("k"), 1).payload(), Some(&value("a")));

    drop(pinned);
    // "a" and the first nine overwrites are behind the latest entry.
    assert_eq!(counters.released(), 10);
    assert_eq!(storage.stats().pending_trims, 0);
}

#[test]
fn test_release_reclaim_can_be_disabled() {
    let (storage, counters) = setup_storage_without_release_reclaim();
    storage.put(key("k"), 1, value("a")).unwrap();
    let pinned = storage.snapshot();
    for n in 0..10 {
        storage.put(key("k"), 1, format!("v{n}")).unwrap();
    }

    drop(pinned);
    assert_eq!(counters.released(), 0);

    assert_eq!(storage.reclaim(), 10);
    assert_eq!(counters.released(), 10);
    assert_eq!(storage.reclaim(), 0);
}

#[test]
fn test_trim_stops_at_oldest_pin() {
    let (storage, counters) = setup_storage_without_release_reclaim();
    storage.put(key("k"), 1, value("v1")).unwrap();
    storage.put(key("k"), 1, value("v2")).unwrap();
    assert_eq!(counters.released(), 1);

    let at_2 = storage.snapshot();
    storage.put(key("k"), 1, value("v3")).unwrap();
    storage.put(key("k"), 1, value("v4")).unwrap();
    let at_4 = storage.snapshot();
    storage.put(key("k"), 1, value("v5")).unwrap();

    // v2 is visible to the oldest pin, so nothing newer than it goes.
    storage.reclaim();
    assert_eq!(counters.released(), 1);

    drop(at_2);
    storage.reclaim();
    // v2 and v3 are behind v4, the entry visible at the new oldest pin.
    assert_eq!(counters.released(), 3);
    assert_eq!(at_4.get(&key("k"), 1).payload(), Some(&value("v4")));
}

#[test]
fn test_trimming_never_changes_live_snapshots() {
    let (storage, _) = setup_small_storage();
    let mut held = Vec::new();

    for round in 0..30u64 {
        let name = format!("key-{}", round % 4);
        match round % 5 {
            3 => {
                storage.delete(name, round % 3).unwrap();
            }
            4 => {
                storage.delete_key(name).unwrap();
            }
            _ => {
                storage.put(name, round % 3, format!("r{round}")).unwrap();
            }
        }
        if round % 4 == 0 {
            let snapshot = storage.snapshot();
            let frozen = contents(&snapshot);
            held.push((snapshot, frozen));
        }
        if round % 7 == 6 && !held.is_empty() {
            held.remove(0);
        }
        storage.reclaim();

        for (snapshot, frozen) in &held {
            assert_eq!(&contents(snapshot), frozen, "snapshot v{}", snapshot.version());
        }
    }
}

#[test]
fn test_stats_count_trimmed_entries() {
    let (storage, _) = setup_storage();
    storage.put(key("k"), 1, value("a")).unwrap();
    storage.put(key("k"), 1, value("b")).unwrap();
    storage.put(key("k"), 1, value("c")).unwrap();

    assert_eq!(storage.stats().trimmed_entries, 2);
}

// =============================================================================
// Release-exactly-once Tests
// =============================================================================

#[test]
fn test_every_payload_released_exactly_once() {
    let (storage, counters) = setup_small_storage();
    let mut puts = 0usize;
    let mut held = Vec::new();

    for round in 0..200u64 {
        let name = format!("key-{}", round % 13);
        match round % 9 {
            0 => {
                storage.delete_key(name).unwrap();
            }
            1 | 5 => {
                storage.delete(name, round % 5).unwrap();
            }
            2 => {
                let mut batch = WriteBatch::new();
                for subkey in 0..3 {
                    batch.put(name.clone(), subkey, format!("b{round}"));
                }
                storage.apply(batch).unwrap();
                puts += 3;
            }
            _ => {
                storage.put(name, round % 5, format!("p{round}")).unwrap();
                puts += 1;
            }
        }
        if round % 10 == 0 {
            held.push(storage.snapshot());
        }
        if round % 25 == 0 {
            held.truncate(held.len() / 2);
            storage.compact().unwrap();
        }
    }

    let released_while_running = counters.released();
    assert!(released_while_running <= puts);

    drop(storage);
    // Snapshots still hold blocks and therefore payloads.
    drop(held);
    assert_eq!(counters.released(), puts);
}

#[test]
fn test_storage_drop_releases_everything() {
    let (storage, counters) = setup_storage();
    for n in 0..50 {
        storage.put(format!("key-{n}"), n % 3, value("v")).unwrap();
    }

    drop(storage);
    assert_eq!(counters.released(), 50);
}

// =============================================================================
// Index Block Lifetime Tests
// =============================================================================

#[test]
fn test_old_block_freed_after_last_snapshot() {
    let (storage, _) = setup_storage();
    storage.put(key("k"), 1, value("v")).unwrap();
    assert_eq!(storage.stats().live_index_blocks, 1);

    let pinned = storage.snapshot();
    let clone = pinned.clone();
    storage.compact().unwrap();
    assert_eq!(storage.stats().live_index_blocks, 2);

    drop(pinned);
    assert_eq!(storage.stats().live_index_blocks, 2);
    drop(clone);
    assert_eq!(storage.stats().live_index_blocks, 1);
}

#[test]
fn test_rotation_drops_dead_keys() {
    let (storage, counters) = setup_storage();
    for n in 0..20 {
        storage.put(format!("key-{n}"), 0, value("v")).unwrap();
    }
    for n in 0..20 {
        storage.delete_key(format!("key-{n}")).unwrap();
    }
    assert_eq!(counters.released(), 20);

    storage.compact().unwrap();
    let stats = storage.stats();
    assert_eq!(stats.keys_count, 0);
    assert_eq!(stats.live_index_blocks, 1);
    assert_eq!(stats.rotations, 1);

    // The index starts over at its initial size once dead keys are gone.
    assert_eq!(stats.key_capacity, storage.config().initial_key_capacity);
}

#[test]
fn test_subkey_churn_rotates_dead_subkeys_away() {
    let behavior = CountingBehavior::new();
    let counters = behavior.counters();
    let config = Config::builder().max_pending_tombstones(64).build();
    let storage = Storage::with_config(behavior, config).unwrap();

    for subkey in 0..2_000u64 {
        storage.put(key("k"), subkey, format!("{subkey}")).unwrap();
        storage.delete(key("k"), subkey).unwrap();
        assert!(storage.stats().indexed_subkeys <= 66, "round {subkey}");
    }

    let stats = storage.stats();
    assert!(stats.rotations > 0);
    assert_eq!(stats.keys_count, 0);
    assert_eq!(stats.subkeys_count, 0);
    assert_eq!(counters.released(), 2_000);

    storage.compact().unwrap();
    assert_eq!(storage.stats().indexed_subkeys, 0);
}

#[test]
fn test_pinned_tombstones_survive_rotation() {
    let config = Config::builder().max_pending_tombstones(8).build();
    let storage = Storage::with_config(CountingBehavior::new(), config).unwrap();
    for subkey in 0..4 {
        storage.put(key("k"), subkey, value("v")).unwrap();
    }
    let pinned = storage.snapshot();

    for subkey in 4..40u64 {
        storage.put(key("k"), subkey, value("w")).unwrap();
        storage.delete(key("k"), subkey).unwrap();
    }
    assert!(storage.stats().rotations > 0);
    assert_eq!(subkeys_of(&pinned, "k").len(), 4);

    drop(pinned);
    storage.compact().unwrap();
    // Only the four subkeys that are still live remain indexed.
    assert_eq!(storage.stats().indexed_subkeys, 4);
}

#[test]
fn test_rotation_keeps_keys_needed_by_pins() {
    let (storage, _) = setup_storage();
    storage.put(key("k"), 1, value("v")).unwrap();
    let pinned = storage.snapshot();
    storage.delete_key(key("k")).unwrap();

    storage.compact().unwrap();
    assert_eq!(pinned.get(&key("k"), 1).payload(), Some(&value("v")));

    // Re-creating the key after it was dropped from the index works.
    drop(pinned);
    storage.compact().unwrap();
    storage.put(key("k"), 2, value("again")).unwrap();
    let snapshot = storage.snapshot();
    assert_eq!(subkeys_of(&snapshot, "k").len(), 1);
    assert_eq!(snapshot.get(&key("k"), 2).payload(), Some(&value("again")));
}
