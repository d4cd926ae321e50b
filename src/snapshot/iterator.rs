//! Snapshot iterators
//!
//! Both iterators walk index slots lazily and filter by the snapshot
//! version. The number of items is known up front from the count history,
//! so the walk stops as soon as the last live item is yielded.

use std::iter::FusedIterator;
use std::sync::Arc;

use crate::behavior::Behavior;
use crate::index::slots::SlotIter;
use crate::index::{IndexBlock, KeyState, SubkeyState};
use crate::payload::VersionedPayloadHandle;

use super::{KeyView, SnapshotInfo};

// =============================================================================
// Keys
// =============================================================================

/// Keys with at least one live subkey at the snapshot version.
pub struct KeyIterator<'a, B: Behavior> {
    slots: SlotIter<'a, Arc<KeyState<B>>>,
    version: u64,
    remaining: usize,
}

impl<'a, B: Behavior> KeyIterator<'a, B> {
    pub(crate) fn new(block: &'a IndexBlock<B>, info: SnapshotInfo) -> Self {
        Self {
            slots: block.keys(),
            version: info.version,
            remaining: info.keys_count,
        }
    }
}

impl<'a, B: Behavior> Iterator for KeyIterator<'a, B> {
    type Item = KeyView<'a, B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        for state in self.slots.by_ref() {
            let subkeys_count = state.subkeys_count_at(self.version);
            if subkeys_count > 0 {
                self.remaining -= 1;
                return Some(KeyView {
                    state,
                    subkeys_count,
                });
            }
        }
        self.remaining = 0;
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<B: Behavior> ExactSizeIterator for KeyIterator<'_, B> {}

impl<B: Behavior> FusedIterator for KeyIterator<'_, B> {}

// =============================================================================
// Subkeys
// =============================================================================

/// A subkey and the payload it holds at the snapshot version.
pub struct SubkeyEntry<'a, P> {
    pub subkey: u64,
    pub payload: VersionedPayloadHandle<'a, P>,
}

impl<P> Clone for SubkeyEntry<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for SubkeyEntry<'_, P> {}

impl<P: std::fmt::Debug> std::fmt::Debug for SubkeyEntry<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubkeyEntry")
            .field("subkey", &self.subkey)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Subkeys of one key holding a payload at the snapshot version.
pub struct SubkeyIterator<'a, B: Behavior> {
    slots: SlotIter<'a, Arc<SubkeyState<B>>>,
    version: u64,
    remaining: usize,
}

impl<'a, B: Behavior> SubkeyIterator<'a, B> {
    pub(crate) fn new(key: &'a KeyState<B>, subkeys_count: usize, version: u64) -> Self {
        Self {
            slots: key.subkeys(),
            version,
            remaining: subkeys_count,
        }
    }
}

impl<'a, B: Behavior> Iterator for SubkeyIterator<'a, B> {
    type Item = SubkeyEntry<'a, B::Payload>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        for state in self.slots.by_ref() {
            if let Some((written, payload)) = state.payload_at(self.version) {
                self.remaining -= 1;
                return Some(SubkeyEntry {
                    subkey: state.subkey(),
                    payload: VersionedPayloadHandle::new(written, payload),
                });
            }
        }
        self.remaining = 0;
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<B: Behavior> ExactSizeIterator for SubkeyIterator<'_, B> {}

impl<B: Behavior> FusedIterator for SubkeyIterator<'_, B> {}
