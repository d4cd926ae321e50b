//! Tests for Snapshot
//!
//! These tests verify:
//! - Point-in-time lookups and isolation from later writes
//! - Key and subkey enumeration
//! - Descriptor-based lookups
//! - Clone/drop semantics
//! - Stability across index block rotation

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;

use common::*;
use vstore::{Behavior, KeyDescriptor, KeyRef, WriteBatch};

// =============================================================================
// Helper Functions
// =============================================================================

fn expected(pairs: &[(u64, &str)]) -> BTreeMap<u64, String> {
    pairs.iter().map(|(subkey, text)| (*subkey, value(text))).collect()
}

// =============================================================================
// Point-in-time Tests
// =============================================================================

#[test]
fn test_put_put_delete_scenario() {
    let (storage, _) = setup_storage();
    let at_0 = storage.snapshot();

    storage.put(key("K1"), 1, value("a")).unwrap();
    let at_1 = storage.snapshot();
    storage.put(key("K1"), 2, value("b")).unwrap();
    let at_2 = storage.snapshot();
    storage.delete(key("K1"), 1).unwrap();
    let at_3 = storage.snapshot();

    assert_eq!(at_3.version(), 3);
    assert!(at_0.get_key(&key("K1")).is_none());
    assert_eq!(subkeys_of(&at_1, "K1"), expected(&[(1, "a")]));
    assert_eq!(subkeys_of(&at_2, "K1"), expected(&[(1, "a"), (2, "b")]));
    assert_eq!(subkeys_of(&at_3, "K1"), expected(&[(2, "b")]));

    assert_eq!(at_2.subkeys_count_of(&key("K1")), 2);
    assert_eq!(at_3.subkeys_count_of(&key("K1")), 1);
}

#[test]
fn test_snapshot_before_put_sees_absent() {
    let (storage, _) = setup_storage();
    storage.put(key("other"), 1, value("x")).unwrap();
    let before = storage.snapshot();

    storage.put(key("k"), 1, value("v")).unwrap();

    assert!(before.get(&key("k"), 1).is_empty());
    assert!(storage.snapshot().get(&key("k"), 1).has_payload());
}

#[test]
fn test_snapshot_isolated_from_later_writes() {
    let (storage, _) = setup_storage();
    for n in 0..10 {
        storage.put(key("k"), n, format!("v{n}")).unwrap();
    }
    let snapshot = storage.snapshot();
    let frozen = contents(&snapshot);

    for n in 0..10 {
        storage.put(key("k"), n, format!("w{n}")).unwrap();
        storage.put(format!("new-{n}"), 0, value("x")).unwrap();
    }
    storage.delete_key(key("k")).unwrap();

    assert_eq!(contents(&snapshot), frozen);
    assert_eq!(snapshot.keys_count(), 1);
    assert_eq!(snapshot.subkeys_count(), 10);
    assert_eq!(snapshot.get(&key("k"), 3).payload(), Some(&value("v3")));
}

#[test]
fn test_held_snapshots_keep_their_versions() {
    let (storage, _) = setup_storage();
    storage.put(key("k"), 1, value("one")).unwrap();
    let at_1 = storage.snapshot();
    storage.put(key("k"), 1, value("two")).unwrap();
    storage.put(key("k"), 2, value("side")).unwrap();
    let at_3 = storage.snapshot();

    for n in 0..50 {
        storage.put(key("k"), 1, format!("later-{n}")).unwrap();
        storage.reclaim();

        assert_eq!(at_1.get(&key("k"), 1).payload(), Some(&value("one")));
        assert!(at_1.get(&key("k"), 2).is_empty());
        assert_eq!(at_3.get(&key("k"), 1).payload(), Some(&value("two")));
        assert_eq!(at_3.get(&key("k"), 2).payload(), Some(&value("side")));
    }
}

#[test]
fn test_delete_key_is_all_or_nothing_across_versions() {
    let (storage, _) = setup_storage();
    for subkey in 0..8 {
        storage.put(key("k"), subkey, value("v")).unwrap();
    }
    let before = storage.snapshot();
    storage.delete_key(key("k")).unwrap();
    let after = storage.snapshot();

    assert_eq!(subkeys_of(&before, "k").len(), 8);
    assert_eq!(before.subkeys_count_of(&key("k")), 8);
    assert!(subkeys_of(&after, "k").is_empty());
    assert_eq!(after.subkeys_count_of(&key("k")), 0);
}

// =============================================================================
// Enumeration Tests
// =============================================================================

#[test]
fn test_keys_iterator_is_exact_and_restartable() {
    let (storage, _) = setup_storage();
    for n in 0..25 {
        storage.put(format!("key-{n:02}"), 0, value("v")).unwrap();
    }
    storage.delete_key(key("key-03")).unwrap();
    let snapshot = storage.snapshot();

    let keys = snapshot.keys();
    assert_eq!(keys.len(), 24);

    let first: Vec<String> = snapshot.keys().map(|view| view.key().clone()).collect();
    let second: Vec<String> = (&snapshot).into_iter().map(|view| view.key().clone()).collect();
    assert_eq!(first.len(), 24);
    // Same block, same order.
    assert_eq!(first, second);
    assert!(!first.contains(&key("key-03")));
}

#[test]
fn test_keys_iterator_size_hint_shrinks() {
    let (storage, _) = setup_storage();
    for n in 0..3 {
        storage.put(format!("k{n}"), 0, value("v")).unwrap();
    }
    let snapshot = storage.snapshot();
    let mut keys = snapshot.keys();

    assert_eq!(keys.size_hint(), (3, Some(3)));
    keys.next();
    assert_eq!(keys.len(), 2);
    keys.next();
    keys.next();
    assert!(keys.next().is_none());
    assert!(keys.next().is_none());
}

#[test]
fn test_subkey_iterator_skips_tombstones() {
    let (storage, _) = setup_storage();
    for subkey in 0..6 {
        storage.put(key("k"), subkey, format!("v{subkey}")).unwrap();
    }
    storage.delete(key("k"), 1).unwrap();
    storage.delete(key("k"), 4).unwrap();

    let snapshot = storage.snapshot();
    let view = snapshot.get_key(&key("k")).unwrap();
    assert_eq!(view.subkeys_count(), 4);

    let subkeys = snapshot.subkeys(&view);
    assert_eq!(subkeys.len(), 4);
    let mut found: Vec<u64> = subkeys.map(|entry| entry.subkey).collect();
    found.sort_unstable();
    assert_eq!(found, vec![0, 2, 3, 5]);
}

#[test]
fn test_subkey_entries_carry_write_versions() {
    let (storage, _) = setup_storage();
    let v1 = storage.put(key("k"), 1, value("a")).unwrap();
    let v2 = storage.put(key("k"), 2, value("b")).unwrap();

    let snapshot = storage.snapshot();
    let all = contents(&snapshot);
    assert_eq!(all[&key("k")][&1], (v1, value("a")));
    assert_eq!(all[&key("k")][&2], (v2, value("b")));
}

#[test]
fn test_key_view_reports_key() {
    let (storage, _) = setup_storage();
    storage.put(key("named"), 5, value("v")).unwrap();

    let snapshot = storage.snapshot();
    let view = snapshot.get_key(&key("named")).unwrap();
    assert_eq!(view.key(), &key("named"));
    assert_eq!(view.subkeys_count(), 1);
}

// =============================================================================
// Descriptor Tests
// =============================================================================

/// Looks a key up by a borrowed prefix + suffix pair, without building the
/// full `String`.
struct SplitKey<'a> {
    hash: u64,
    prefix: &'a str,
    suffix: &'a str,
}

impl KeyDescriptor<String> for SplitKey<'_> {
    fn key_hash(&self) -> u64 {
        self.hash
    }

    fn matches(&self, stored: &String) -> bool {
        stored.len() == self.prefix.len() + self.suffix.len()
            && stored.starts_with(self.prefix)
            && stored.ends_with(self.suffix)
    }
}

#[test]
fn test_lookup_by_custom_descriptor() {
    let (storage, _) = setup_storage();
    storage.put(key("user:42"), 1, value("alice")).unwrap();
    storage.put(key("user:43"), 1, value("bob")).unwrap();

    let snapshot = storage.snapshot();
    let descriptor = SplitKey {
        hash: snapshot.behavior().hash_key(&key("user:42")),
        prefix: "user:",
        suffix: "42",
    };

    assert_eq!(snapshot.get_by(&descriptor, 1).payload(), Some(&value("alice")));
    assert_eq!(snapshot.subkeys_count_by(&descriptor), 1);
    assert_eq!(snapshot.get_key_by(&descriptor).unwrap().key(), &key("user:42"));
}

#[test]
fn test_key_ref_descriptor_matches_get() {
    let (storage, _) = setup_storage();
    storage.put(key("k"), 1, value("v")).unwrap();
    let snapshot = storage.snapshot();

    let k = key("k");
    let descriptor = KeyRef::new(snapshot.behavior(), &k);
    assert_eq!(snapshot.get_by(&descriptor, 1), snapshot.get(&k, 1));
}

// =============================================================================
// Handle / Lifetime Tests
// =============================================================================

#[test]
fn test_clone_shares_version_and_pin() {
    let (storage, _) = setup_storage();
    storage.put(key("k"), 1, value("v")).unwrap();

    let snapshot = storage.snapshot();
    let copy = snapshot.clone();
    assert_eq!(copy.version(), snapshot.version());
    assert_eq!(copy.info(), snapshot.info());
    assert_eq!(storage.stats().live_snapshots, 1);

    drop(snapshot);
    assert_eq!(storage.stats().live_snapshots, 1);
    assert_eq!(copy.get(&key("k"), 1).payload(), Some(&value("v")));

    drop(copy);
    assert_eq!(storage.stats().live_snapshots, 0);
}

#[test]
fn test_moved_snapshot_keeps_single_pin() {
    let (storage, _) = setup_storage();
    storage.put(key("k"), 1, value("v")).unwrap();

    let snapshot = storage.snapshot();
    let moved = vec![snapshot];
    assert_eq!(storage.stats().live_snapshots, 1);
    drop(moved);
    assert_eq!(storage.stats().live_snapshots, 0);
}

#[test]
fn test_get_owned_outlives_snapshot() {
    let (storage, counters) = setup_storage();
    storage.put(key("k"), 1, value("kept")).unwrap();

    let owned = {
        let snapshot = storage.snapshot();
        snapshot.get_owned(&key("k"), 1)
    };

    assert_eq!(owned, Some((1, value("kept"))));
    assert_eq!(counters.acquired(), 1);
    assert_eq!(storage.snapshot().get_owned(&key("absent"), 1), None);
}

#[test]
fn test_snapshot_outlives_storage() {
    let (storage, counters) = setup_storage();
    storage.put(key("k"), 1, value("v")).unwrap();
    let snapshot = storage.snapshot();

    drop(storage);
    assert_eq!(snapshot.get(&key("k"), 1).payload(), Some(&value("v")));
    assert_eq!(counters.released(), 0);

    drop(snapshot);
    assert_eq!(counters.released(), 1);
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_snapshots_stable_across_rotation() {
    let (storage, _) = setup_small_storage();
    let mut snapshots = Vec::new();
    let mut frozen = Vec::new();

    for round in 0..12u64 {
        let mut batch = WriteBatch::new();
        for n in 0..=round {
            batch.put(format!("key-{n}"), round, format!("r{round}"));
        }
        if round % 3 == 2 {
            batch.delete_key(format!("key-{}", round / 3));
        }
        storage.apply(batch).unwrap();

        let snapshot = storage.snapshot();
        frozen.push(contents(&snapshot));
        snapshots.push(snapshot);
    }

    assert!(storage.stats().rotations > 0);
    for (snapshot, expected) in snapshots.iter().zip(&frozen) {
        assert_eq!(&contents(snapshot), expected);
        assert_eq!(snapshot.keys().len(), expected.len());
    }
}

#[test]
fn test_compact_preserves_contents() {
    let (storage, _) = setup_small_storage();
    for n in 0..10 {
        for subkey in 0..6 {
            storage.put(format!("key-{n}"), subkey, format!("{n}/{subkey}")).unwrap();
        }
    }
    for n in (0..10).step_by(2) {
        storage.delete_key(format!("key-{n}")).unwrap();
    }

    let held = storage.snapshot();
    let before = contents(&held);
    let version = storage.version();

    storage.compact().unwrap();

    assert_eq!(storage.version(), version);
    let after = storage.snapshot();
    assert_eq!(after.version(), version);
    assert_eq!(contents(&after), before);
    assert_eq!(contents(&held), before);
    assert_eq!(after.keys_count(), 5);
    assert_eq!(after.subkeys_count(), 30);
}
