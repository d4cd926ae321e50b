//! Key and subkey state
//!
//! Per-key subkey tables and per-subkey payload histories.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::behavior::Behavior;
use crate::chain::VersionChain;
use crate::error::Result;

use super::slots::{SlotIter, SlotTable};

/// History of one (key, subkey) pair.
pub(crate) struct SubkeyState<B: Behavior> {
    subkey: u64,
    /// Latest batch that resolved this state for a write.
    touched_in: AtomicU64,
    chain: VersionChain<Option<B::Payload>>,
    behavior: Arc<B>,
}

impl<B: Behavior> SubkeyState<B> {
    pub(crate) fn new(subkey: u64, created_in: u64, behavior: Arc<B>) -> Self {
        Self {
            subkey,
            touched_in: AtomicU64::new(created_in),
            chain: VersionChain::new(),
            behavior,
        }
    }

    pub(crate) fn subkey(&self) -> u64 {
        self.subkey
    }

    pub(crate) fn chain(&self) -> &VersionChain<Option<B::Payload>> {
        &self.chain
    }

    /// Mark this state as written by the batch in flight. Writer only.
    pub(crate) fn touch(&self, pending: u64) {
        self.touched_in.store(pending, Ordering::Relaxed);
    }

    /// Payload visible at `version`, with the version that wrote it.
    pub(crate) fn payload_at(&self, version: u64) -> Option<(u64, &B::Payload)> {
        match self.chain.at(version) {
            Some((written, Some(payload))) => Some((written, payload)),
            _ => None,
        }
    }

    /// Latest entry is a payload (not a tombstone, not empty).
    pub(crate) fn is_live(&self) -> bool {
        matches!(self.chain.latest(), Some((_, Some(_))))
    }

    /// Version of the latest live payload.
    pub(crate) fn live_version(&self) -> Option<u64> {
        match self.chain.latest() {
            Some((version, Some(_))) => Some(version),
            _ => None,
        }
    }

    /// No reader at or after `oldest` can see this subkey, and the batch in
    /// flight (`pending`) is not about to write it.
    pub(crate) fn is_dead(&self, oldest: u64, pending: u64) -> bool {
        if self.touched_in.load(Ordering::Relaxed) == pending {
            return false;
        }
        match self.chain.latest() {
            None => true,
            Some((version, None)) => version <= oldest,
            Some((_, Some(_))) => false,
        }
    }
}

impl<B: Behavior> Drop for SubkeyState<B> {
    fn drop(&mut self) {
        for payload in self.chain.take_all().into_iter().flatten() {
            self.behavior.release_payload(payload);
        }
    }
}

/// One key: its identity, subkeys and live-subkey count history.
pub(crate) struct KeyState<B: Behavior> {
    key: Arc<B::Key>,
    hash: u64,
    touched_in: AtomicU64,
    counts: Arc<VersionChain<usize>>,
    subkeys: SlotTable<Arc<SubkeyState<B>>>,
}

impl<B: Behavior> KeyState<B> {
    pub(crate) fn new(
        key: B::Key,
        hash: u64,
        created_in: u64,
        subkey_capacity: usize,
        max_load_percent: u8,
    ) -> Result<Self> {
        Ok(Self {
            key: Arc::new(key),
            hash,
            touched_in: AtomicU64::new(created_in),
            counts: Arc::new(VersionChain::new()),
            subkeys: SlotTable::with_capacity(subkey_capacity, max_load_percent)?,
        })
    }

    pub(crate) fn key(&self) -> &B::Key {
        &self.key
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    /// Mark this key as written by the batch in flight. Writer only.
    pub(crate) fn touch(&self, pending: u64) {
        self.touched_in.store(pending, Ordering::Relaxed);
    }

    pub(crate) fn counts(&self) -> &Arc<VersionChain<usize>> {
        &self.counts
    }

    pub(crate) fn subkeys_count_at(&self, version: u64) -> usize {
        self.counts.at(version).map_or(0, |(_, count)| *count)
    }

    pub(crate) fn live_subkeys_count(&self) -> usize {
        self.counts.latest().map_or(0, |(_, count)| *count)
    }

    pub(crate) fn find_subkey(&self, subkey: u64) -> Option<&Arc<SubkeyState<B>>> {
        self.subkeys.find(subkey, |state| state.subkey == subkey)
    }

    /// Add a subkey that is not present yet. Writer only.
    ///
    /// Returns the stored state and whether an overflow table was allocated.
    pub(crate) fn insert_subkey(
        &self,
        state: Arc<SubkeyState<B>>,
    ) -> Result<(&Arc<SubkeyState<B>>, bool)> {
        let inserted = self.subkeys.insert(state.subkey, state, true)?;
        Ok((inserted.value, inserted.grew))
    }

    /// Subkey states in the table, dead ones included.
    pub(crate) fn subkey_states(&self) -> usize {
        self.subkeys.len()
    }

    pub(crate) fn subkeys(&self) -> SlotIter<'_, Arc<SubkeyState<B>>> {
        self.subkeys.iter()
    }

    /// Every subkey is deleted as of `oldest` (or the key was left empty by a
    /// batch that never published), and the batch in flight does not write it.
    pub(crate) fn is_dead(&self, oldest: u64, pending: u64) -> bool {
        if self.touched_in.load(Ordering::Relaxed) == pending {
            return false;
        }
        match self.counts.latest() {
            None => true,
            Some((version, count)) => *count == 0 && version <= oldest,
        }
    }

    pub(crate) fn needs_rebuild(&self, oldest: u64, pending: u64) -> bool {
        self.subkeys.depth() > 1 || self.subkeys().any(|state| state.is_dead(oldest, pending))
    }

    /// Same key with one consolidated subkey table and without dead subkeys.
    /// Chains and the count history are shared with `self`.
    pub(crate) fn rebuild(
        &self,
        oldest: u64,
        pending: u64,
        min_capacity: usize,
        max_load_percent: u8,
    ) -> Result<Self> {
        let mut kept = Vec::new();
        kept.try_reserve_exact(self.subkeys.len())?;
        kept.extend(
            self.subkeys()
                .filter(|state| !state.is_dead(oldest, pending))
                .cloned(),
        );

        let subkeys = SlotTable::sized_for(kept.len(), min_capacity, max_load_percent)?;
        for state in kept {
            subkeys.insert(state.subkey, state, false)?;
        }

        Ok(Self {
            key: Arc::clone(&self.key),
            hash: self.hash,
            touched_in: AtomicU64::new(self.touched_in.load(Ordering::Relaxed)),
            counts: Arc::clone(&self.counts),
            subkeys,
        })
    }
}
