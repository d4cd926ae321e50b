//! Index Block
//!
//! The reference-counted unit shared by the writer and every snapshot taken
//! while the block was current. Dropping the last `Arc` frees the block
//! and every key state no newer block still references.

use std::sync::Arc;

use crate::behavior::{Behavior, KeyDescriptor};
use crate::error::Result;
use crate::storage::metrics::StorageMetrics;

use super::key_state::KeyState;
use super::slots::{SlotIter, SlotTable};

pub(crate) struct IndexBlock<B: Behavior> {
    id: u64,
    /// Latest published version when the block was built.
    sealed_at: u64,
    keys: SlotTable<Arc<KeyState<B>>>,
    metrics: Arc<StorageMetrics>,
}

impl<B: Behavior> IndexBlock<B> {
    pub(crate) fn new(
        id: u64,
        sealed_at: u64,
        keys: SlotTable<Arc<KeyState<B>>>,
        metrics: Arc<StorageMetrics>,
    ) -> Self {
        metrics.block_created();
        Self {
            id,
            sealed_at,
            keys,
            metrics,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key_capacity(&self) -> usize {
        self.keys.capacity()
    }

    /// Key states indexed by this block, live or not.
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn find<D>(&self, descriptor: &D) -> Option<&Arc<KeyState<B>>>
    where
        D: KeyDescriptor<B::Key> + ?Sized,
    {
        let hash = descriptor.key_hash();
        self.keys
            .find(hash, |state| state.hash() == hash && descriptor.matches(state.key()))
    }

    /// Another key fits without rotating.
    pub(crate) fn has_room(&self) -> bool {
        !self.keys.is_at_limit()
    }

    /// Add a key that is not present yet. Writer only; the caller checks
    /// `has_room` first.
    pub(crate) fn insert(&self, state: Arc<KeyState<B>>) -> Result<&Arc<KeyState<B>>> {
        let inserted = self.keys.insert(state.hash(), state, false)?;
        Ok(inserted.value)
    }

    pub(crate) fn keys(&self) -> SlotIter<'_, Arc<KeyState<B>>> {
        self.keys.iter()
    }
}

impl<B: Behavior> Drop for IndexBlock<B> {
    fn drop(&mut self) {
        tracing::trace!(block = self.id, sealed_at = self.sealed_at, "index block released");
        self.metrics.block_dropped();
    }
}
