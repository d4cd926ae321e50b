//! Storage metrics
//!
//! Counters shared by the writer and index blocks, and the point-in-time
//! `StorageStats` view handed to callers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub(crate) struct StorageMetrics {
    live_blocks: AtomicUsize,
    rotations: AtomicU64,
    trimmed_entries: AtomicU64,
}

impl StorageMetrics {
    pub(crate) fn block_created(&self) {
        self.live_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn block_dropped(&self) {
        self.live_blocks.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn rotated(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn trimmed(&self, entries: usize) {
        self.trimmed_entries.fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub(crate) fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Relaxed)
    }

    pub(crate) fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    pub(crate) fn trimmed_entries(&self) -> u64 {
        self.trimmed_entries.load(Ordering::Relaxed)
    }
}

/// Point-in-time statistics of a Storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Latest published version
    pub version: u64,

    /// Keys with at least one live subkey at `version`
    pub keys_count: usize,

    /// Live subkeys across all keys at `version`
    pub subkeys_count: usize,

    /// Snapshot pins currently registered
    pub live_snapshots: usize,

    /// Oldest version still pinned by a snapshot
    pub oldest_pinned_version: Option<u64>,

    /// Index blocks not yet freed (the current one included)
    pub live_index_blocks: usize,

    /// Key slots in the current index block
    pub key_capacity: usize,

    /// Index blocks built by rotation or compaction
    pub rotations: u64,

    /// History entries freed by reclamation
    pub trimmed_entries: u64,

    /// Subkey states held by the current index block, including deleted
    /// ones not dropped by a rotation yet
    pub indexed_subkeys: usize,

    /// Chains waiting for the oldest pin to move past them
    pub pending_trims: usize,
}
