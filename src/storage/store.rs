//! Storage
//!
//! Public front of the engine: the writer, the pin registry and the
//! published version, shared with snapshots through `Arc`/`Weak`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

use crate::behavior::Behavior;
use crate::config::Config;
use crate::error::Result;
use crate::index::slots::SlotTable;
use crate::index::IndexBlock;
use crate::snapshot::{Snapshot, SnapshotInfo};

use super::batch::{BatchOutcome, Operation, WriteBatch};
use super::metrics::{StorageMetrics, StorageStats};
use super::reclaim::PinRegistry;
use super::writer::Writer;

/// Versioned key/subkey store with snapshot reads.
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/delete/apply/compact): serialized by the writer lock.
///   Each call publishes exactly one new version, or none on failure.
/// - **Snapshots**: `snapshot()` and snapshot release take the registry
///   lock only to read the published (block, version) pair and update the
///   pin map. The writer holds that lock for the same kind of short section
///   (reading the oldest pin, swapping the published pair), never while it
///   applies a batch, rotates or trims. Reads through a snapshot never lock.
/// - **Stats**: `stats()` takes the writer lock and waits behind a mutation
///   in progress.
/// - **Reclamation**: runs under the writer lock after each mutation, on
///   `reclaim()`, and when the oldest snapshot is released while the writer
///   is idle.
pub struct Storage<B: Behavior> {
    shared: Arc<Shared<B>>,
}

pub(crate) struct Shared<B: Behavior> {
    behavior: Arc<B>,
    config: Config,

    /// Serializes every mutation, rotation and reclamation pass.
    /// Lock order: writer, then registry.
    writer: Mutex<Writer<B>>,

    /// Published (block, info) pair and snapshot pins
    registry: Mutex<PinRegistry<B>>,

    /// Mirror of the published version for lock-free reads
    published_version: CachePadded<AtomicU64>,

    metrics: Arc<StorageMetrics>,
}

impl<B: Behavior> Storage<B> {
    /// Create an empty storage with the default config.
    pub fn new(behavior: B) -> Result<Self> {
        Self::with_config(behavior, Config::default())
    }

    /// Create an empty storage. Version 0 is published and has no keys.
    pub fn with_config(behavior: B, config: Config) -> Result<Self> {
        config.validate()?;

        let behavior = Arc::new(behavior);
        let metrics = Arc::new(StorageMetrics::default());
        let keys = SlotTable::with_capacity(config.initial_key_capacity, config.max_load_percent)?;
        let block = Arc::new(IndexBlock::new(0, 0, keys, Arc::clone(&metrics)));
        tracing::debug!(
            key_capacity = block.key_capacity(),
            max_load_percent = config.max_load_percent,
            "storage created"
        );

        let writer = Writer::new(
            Arc::clone(&behavior),
            config.clone(),
            Arc::clone(&metrics),
            Arc::clone(&block),
        );
        let registry = PinRegistry::new(block, SnapshotInfo::default());

        Ok(Self {
            shared: Arc::new(Shared {
                behavior,
                config,
                writer: Mutex::new(writer),
                registry: Mutex::new(registry),
                published_version: CachePadded::new(AtomicU64::new(0)),
                metrics,
            }),
        })
    }

    pub fn behavior(&self) -> &B {
        &self.shared.behavior
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Latest published version.
    pub fn version(&self) -> u64 {
        self.shared.published_version.load(Ordering::Acquire)
    }

    /// Store `payload` under (key, subkey) at the next version.
    pub fn put(&self, key: B::Key, subkey: u64, payload: B::Payload) -> Result<u64> {
        self.shared.apply_operations(vec![Operation::Put {
            key,
            subkey,
            payload,
        }])
    }

    /// Tombstone (key, subkey) at the next version. The version advances
    /// even if the subkey has nothing to delete.
    pub fn delete(&self, key: B::Key, subkey: u64) -> Result<u64> {
        self.shared
            .apply_operations(vec![Operation::Delete { key, subkey }])
    }

    /// Tombstone every live subkey of `key` under one version.
    pub fn delete_key(&self, key: B::Key) -> Result<u64> {
        self.shared
            .apply_operations(vec![Operation::DeleteKey { key }])
    }

    /// Apply a batch under one version, if its prerequisites hold.
    pub fn apply(&self, batch: WriteBatch<B>) -> Result<BatchOutcome> {
        self.shared.apply(batch)
    }

    /// Pin the latest published version.
    pub fn snapshot(&self) -> Snapshot<B> {
        self.shared.take_snapshot()
    }

    /// Publish a consolidated index block at the current version and
    /// reclaim what it no longer references.
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.shared.writer.lock();
        let oldest = self.shared.registry.lock().oldest_needed();
        writer.compact(oldest)?;
        tracing::debug!(version = writer.info().version, "storage compacted");
        self.shared.publish(&mut writer);
        Ok(())
    }

    /// Run a reclamation pass now. Returns the number of entries freed.
    pub fn reclaim(&self) -> usize {
        let mut writer = self.shared.writer.lock();
        let oldest = self.shared.registry.lock().oldest_needed();
        writer.reclaim(oldest)
    }

    /// Point-in-time statistics. Takes the writer lock, so this waits for a
    /// mutation in progress.
    pub fn stats(&self) -> StorageStats {
        let writer = self.shared.writer.lock();
        let registry = self.shared.registry.lock();
        let info = registry.info();
        StorageStats {
            version: info.version,
            keys_count: info.keys_count,
            subkeys_count: info.subkeys_count,
            live_snapshots: registry.live_snapshots(),
            oldest_pinned_version: registry.oldest_pinned(),
            live_index_blocks: self.shared.metrics.live_blocks(),
            key_capacity: writer.block().key_capacity(),
            rotations: self.shared.metrics.rotations(),
            trimmed_entries: self.shared.metrics.trimmed_entries(),
            pending_trims: writer.pending_trims(),
            indexed_subkeys: writer.indexed_subkeys(),
        }
    }
}

impl<B: Behavior> Shared<B> {
    fn apply(&self, batch: WriteBatch<B>) -> Result<BatchOutcome> {
        let (operations, prerequisites) = batch.into_parts();
        let mut writer = self.writer.lock();
        if !writer.check(&prerequisites) {
            tracing::trace!(version = writer.info().version, "batch prerequisites failed");
            writer.discard(operations);
            return Ok(BatchOutcome::PrerequisitesFailed);
        }
        let version = self.apply_locked(&mut writer, operations)?;
        Ok(BatchOutcome::Applied { version })
    }

    fn apply_operations(&self, operations: Vec<Operation<B>>) -> Result<u64> {
        let mut writer = self.writer.lock();
        self.apply_locked(&mut writer, operations)
    }

    fn apply_locked(&self, writer: &mut Writer<B>, operations: Vec<Operation<B>>) -> Result<u64> {
        let oldest = self.registry.lock().oldest_needed();
        let version = writer.apply(operations, oldest)?;
        self.publish(writer);
        Ok(version)
    }

    /// Make the writer's block and counters visible, then reclaim.
    fn publish(&self, writer: &mut Writer<B>) {
        let info = writer.info();
        let (previous, oldest) = {
            let mut registry = self.registry.lock();
            let previous = registry.publish(Arc::clone(writer.block()), info);
            self.published_version.store(info.version, Ordering::Release);
            (previous, registry.oldest_needed())
        };
        // May free the block (and whatever only it referenced); keep that
        // out of the registry lock.
        drop(previous);
        writer.reclaim(oldest);
    }

    fn take_snapshot(self: &Arc<Self>) -> Snapshot<B> {
        let (block, info) = self.registry.lock().pin();
        Snapshot::new(block, info, Arc::clone(&self.behavior), Arc::downgrade(self))
    }

    /// Called once per snapshot, when its last clone is dropped.
    pub(crate) fn release_pin(&self, version: u64) {
        let advanced = self.registry.lock().unpin(version);
        if !advanced || !self.config.reclaim_on_release {
            return;
        }
        // Never wait for the writer from a reader thread; the writer
        // reclaims after its next publication anyway.
        if let Some(mut writer) = self.writer.try_lock() {
            let oldest = self.registry.lock().oldest_needed();
            writer.reclaim(oldest);
        }
    }
}
