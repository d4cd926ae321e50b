//! Writer
//!
//! The single mutator. Lives behind the storage writer lock.
//!
//! ## Applying a batch
//! 1. Check prerequisites against the latest state. On failure nothing is
//!    touched.
//! 2. Resolve every operation to its key/subkey state, creating missing
//!    ones (and rotating the index block when the key table is full). All
//!    fallible allocation happens here; new states have no entries yet, so
//!    nothing is visible if this step fails.
//! 3. Append entries tagged with the pending version and update counts.
//!    Infallible.
//! 4. The caller publishes the pending version.
//!
//! Payloads of a batch that is rejected (failed prerequisites) or fails
//! in step 2 go back through `Behavior::release_payload`.
//!
//! ## Rotation triggers
//! - The key table is full (during step 2).
//! - Overflow subkey tables or tombstones appended since the block was
//!   sealed pass their `Config` thresholds (after step 3). The tombstone
//!   threshold is at least the number of subkey states the block was
//!   sealed with, which keeps rotation cost proportional to the churn.

use std::sync::Arc;

use crate::behavior::{Behavior, KeyDescriptor, KeyRef};
use crate::config::Config;
use crate::error::Result;
use crate::index::slots::SlotTable;
use crate::index::{IndexBlock, KeyState, SubkeyState};
use crate::snapshot::SnapshotInfo;

use super::batch::{Operation, Prerequisite};
use super::metrics::StorageMetrics;
use super::reclaim::TrimQueue;

enum Step<B: Behavior> {
    Put {
        key: Arc<KeyState<B>>,
        subkey: Arc<SubkeyState<B>>,
        payload: B::Payload,
    },
    Delete {
        key: Arc<KeyState<B>>,
        subkey: Arc<SubkeyState<B>>,
    },
    DeleteKey {
        key: Arc<KeyState<B>>,
    },
    /// Delete of something that does not exist.
    Skip,
}

pub(crate) struct Writer<B: Behavior> {
    behavior: Arc<B>,
    config: Config,
    metrics: Arc<StorageMetrics>,

    /// Working block; equal to the published one between batches.
    block: Arc<IndexBlock<B>>,

    /// Latest published version
    version: u64,
    keys_count: usize,
    subkeys_count: usize,

    /// Overflow subkey tables allocated since `block` was sealed
    pending_overflows: usize,
    /// Tombstones appended since `block` was sealed
    pending_tombstones: usize,
    /// Subkey states referenced by `block`, dead ones included
    indexed_subkeys: usize,
    /// `indexed_subkeys` when `block` was sealed
    sealed_subkeys: usize,
    next_block_id: u64,
    trims: TrimQueue<B>,
}

impl<B: Behavior> Writer<B> {
    pub(crate) fn new(
        behavior: Arc<B>,
        config: Config,
        metrics: Arc<StorageMetrics>,
        block: Arc<IndexBlock<B>>,
    ) -> Self {
        let next_block_id = block.id() + 1;
        Self {
            behavior,
            config,
            metrics,
            block,
            version: 0,
            keys_count: 0,
            subkeys_count: 0,
            pending_overflows: 0,
            pending_tombstones: 0,
            indexed_subkeys: 0,
            sealed_subkeys: 0,
            next_block_id,
            trims: TrimQueue::new(),
        }
    }

    pub(crate) fn block(&self) -> &Arc<IndexBlock<B>> {
        &self.block
    }

    pub(crate) fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            version: self.version,
            keys_count: self.keys_count,
            subkeys_count: self.subkeys_count,
        }
    }

    pub(crate) fn pending_trims(&self) -> usize {
        self.trims.len()
    }

    pub(crate) fn indexed_subkeys(&self) -> usize {
        self.indexed_subkeys
    }

    // =========================================================================
    // Prerequisites
    // =========================================================================

    pub(crate) fn check(&self, prerequisites: &[Prerequisite<B>]) -> bool {
        prerequisites.iter().all(|prerequisite| match prerequisite {
            Prerequisite::SubkeyVersion {
                key,
                subkey,
                version,
            } => {
                let found = self
                    .lookup(key)
                    .and_then(|state| state.find_subkey(*subkey))
                    .and_then(|state| state.live_version());
                found == *version
            }
            Prerequisite::SubkeysCount { key, count } => {
                let found = self
                    .lookup(key)
                    .map_or(0, |state| state.live_subkeys_count());
                found == *count
            }
        })
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply operations under the next version and return it. The caller
    /// publishes the result.
    pub(crate) fn apply(&mut self, operations: Vec<Operation<B>>, oldest: u64) -> Result<u64> {
        let pending = self.version + 1;

        let mut steps = Vec::new();
        if let Err(err) = steps.try_reserve_exact(operations.len()) {
            self.discard(operations);
            return Err(err.into());
        }
        let mut operations = operations.into_iter();
        for operation in operations.by_ref() {
            match self.resolve(operation, pending, oldest) {
                Ok(step) => steps.push(step),
                Err(err) => {
                    self.discard_steps(steps);
                    self.discard(operations);
                    return Err(err);
                }
            }
        }

        for step in steps {
            self.commit(step, pending);
        }
        self.version = pending;

        if self.should_rotate() {
            // The batch is already complete in the current block; a failed
            // rotation only postpones consolidation.
            if let Err(err) = self.rotate(oldest, pending + 1) {
                tracing::warn!(error = %err, "index block rotation postponed");
            }
        }

        tracing::trace!(
            version = pending,
            keys = self.keys_count,
            subkeys = self.subkeys_count,
            "batch applied"
        );
        Ok(pending)
    }

    fn should_rotate(&self) -> bool {
        let tombstone_limit = self.config.max_pending_tombstones.max(self.sealed_subkeys);
        self.pending_overflows > self.config.max_pending_overflows
            || self.pending_tombstones > tombstone_limit
    }

    /// Hand the payloads of operations that will not be applied back to the
    /// behavior.
    pub(crate) fn discard(&self, operations: impl IntoIterator<Item = Operation<B>>) {
        for payload in operations.into_iter().filter_map(Operation::into_payload) {
            self.behavior.release_payload(payload);
        }
    }

    fn discard_steps(&self, steps: Vec<Step<B>>) {
        for step in steps {
            if let Step::Put { payload, .. } = step {
                self.behavior.release_payload(payload);
            }
        }
    }

    fn lookup(&self, key: &B::Key) -> Option<&Arc<KeyState<B>>> {
        self.block.find(&KeyRef::new(&*self.behavior, key))
    }

    fn resolve(&mut self, operation: Operation<B>, pending: u64, oldest: u64) -> Result<Step<B>> {
        let step = match operation {
            Operation::Put {
                key,
                subkey,
                payload,
            } => {
                let resolved = self
                    .resolve_key(key, pending, oldest)
                    .and_then(|key| Ok((self.resolve_subkey(&key, subkey, pending)?, key)));
                match resolved {
                    Ok((subkey, key)) => Step::Put {
                        key,
                        subkey,
                        payload,
                    },
                    Err(err) => {
                        self.behavior.release_payload(payload);
                        return Err(err);
                    }
                }
            }
            Operation::Delete { key, subkey } => match self.lookup(&key) {
                Some(state) => match state.find_subkey(subkey) {
                    Some(subkey) => Step::Delete {
                        subkey: Arc::clone(subkey),
                        key: Arc::clone(state),
                    },
                    None => Step::Skip,
                },
                None => Step::Skip,
            },
            Operation::DeleteKey { key } => match self.lookup(&key) {
                Some(state) => Step::DeleteKey {
                    key: Arc::clone(state),
                },
                None => Step::Skip,
            },
        };
        Ok(step)
    }

    fn resolve_key(&mut self, key: B::Key, pending: u64, oldest: u64) -> Result<Arc<KeyState<B>>> {
        let (hash, existing) = {
            let descriptor = KeyRef::new(&*self.behavior, &key);
            (descriptor.key_hash(), self.block.find(&descriptor).cloned())
        };
        if let Some(state) = existing {
            state.touch(pending);
            return Ok(state);
        }

        if !self.block.has_room() {
            self.rotate(oldest, pending)?;
        }
        let state = Arc::new(KeyState::new(
            key,
            hash,
            pending,
            self.config.initial_subkey_capacity,
            self.config.max_load_percent,
        )?);
        self.block.insert(Arc::clone(&state))?;
        Ok(state)
    }

    fn resolve_subkey(
        &mut self,
        key: &KeyState<B>,
        subkey: u64,
        pending: u64,
    ) -> Result<Arc<SubkeyState<B>>> {
        if let Some(state) = key.find_subkey(subkey) {
            state.touch(pending);
            return Ok(Arc::clone(state));
        }
        let state = Arc::new(SubkeyState::new(subkey, pending, Arc::clone(&self.behavior)));
        let (stored, grew) = key.insert_subkey(state)?;
        self.indexed_subkeys += 1;
        if grew {
            self.pending_overflows += 1;
        }
        Ok(Arc::clone(stored))
    }

    fn commit(&mut self, step: Step<B>, version: u64) {
        match step {
            Step::Put {
                key,
                subkey,
                payload,
            } => {
                let was_live = subkey.is_live();
                self.append(&subkey, version, Some(payload));
                if !was_live {
                    let count = key.live_subkeys_count();
                    self.set_count(&key, version, count + 1);
                }
            }
            Step::Delete { key, subkey } => {
                if subkey.is_live() {
                    self.append(&subkey, version, None);
                    let count = key.live_subkeys_count();
                    self.set_count(&key, version, count - 1);
                }
            }
            Step::DeleteKey { key } => {
                let mut deleted = 0;
                for subkey in key.subkeys() {
                    if subkey.is_live() {
                        self.append(subkey, version, None);
                        deleted += 1;
                    }
                }
                if deleted > 0 {
                    let count = key.live_subkeys_count();
                    self.set_count(&key, version, count - deleted);
                }
            }
            Step::Skip => {}
        }
    }

    fn append(&mut self, state: &Arc<SubkeyState<B>>, version: u64, value: Option<B::Payload>) {
        let superseding = !state.chain().is_empty();
        if value.is_none() {
            self.pending_tombstones += 1;
        }
        state.chain().push(version, value);
        if superseding {
            self.trims.push_payloads(version, Arc::clone(state));
        }
    }

    fn set_count(&mut self, key: &KeyState<B>, version: u64, count: usize) {
        let before = key.live_subkeys_count();
        let counts = key.counts();
        let superseding = !counts.is_empty();
        counts.push(version, count);
        if superseding {
            self.trims.push_counts(version, Arc::clone(counts));
        }

        self.subkeys_count = self.subkeys_count - before + count;
        if before == 0 && count > 0 {
            self.keys_count += 1;
        } else if before > 0 && count == 0 {
            self.keys_count -= 1;
        }
    }

    // =========================================================================
    // Rotation / Reclamation
    // =========================================================================

    /// Build and switch to a new working block: dead keys dropped, subkey
    /// tables consolidated, key table sized for one more key. The previous
    /// block stays alive for as long as something still holds it.
    ///
    /// `pending` is the version of the batch in flight; states it created are
    /// kept even though they have no entries yet.
    pub(crate) fn rotate(&mut self, oldest: u64, pending: u64) -> Result<()> {
        let load = self.config.max_load_percent;
        let mut kept = Vec::new();
        kept.try_reserve_exact(self.block.len())?;

        let mut dropped = 0usize;
        let mut indexed_subkeys = 0usize;
        for state in self.block.keys() {
            if state.is_dead(oldest, pending) {
                dropped += 1;
                continue;
            }
            let state = if state.needs_rebuild(oldest, pending) {
                let rebuilt =
                    state.rebuild(oldest, pending, self.config.initial_subkey_capacity, load)?;
                Arc::new(rebuilt)
            } else {
                Arc::clone(state)
            };
            indexed_subkeys += state.subkey_states();
            kept.push(state);
        }

        let keys = SlotTable::sized_for(kept.len() + 1, self.config.initial_key_capacity, load)?;
        for state in kept {
            keys.insert(state.hash(), state, false)?;
        }

        let id = self.next_block_id;
        self.next_block_id += 1;
        let block = IndexBlock::new(id, self.version, keys, Arc::clone(&self.metrics));
        tracing::debug!(
            block = id,
            keys = block.len(),
            capacity = block.key_capacity(),
            dropped,
            subkeys = indexed_subkeys,
            sealed_at = self.version,
            "rotated index block"
        );

        self.block = Arc::new(block);
        self.pending_overflows = 0;
        self.pending_tombstones = 0;
        self.indexed_subkeys = indexed_subkeys;
        self.sealed_subkeys = indexed_subkeys;
        self.metrics.rotated();
        Ok(())
    }

    /// Consolidate the working block at the current version.
    pub(crate) fn compact(&mut self, oldest: u64) -> Result<()> {
        self.rotate(oldest, self.version + 1)
    }

    /// Trim history no reader at or after `oldest` can reach.
    pub(crate) fn reclaim(&mut self, oldest: u64) -> usize {
        let freed = self.trims.run(oldest, &self.behavior);
        if freed > 0 {
            self.metrics.trimmed(freed);
            tracing::trace!(oldest, freed, pending = self.trims.len(), "reclaimed history");
        }
        freed
    }
}
