//! Snapshot Module
//!
//! Read-only views of the storage fixed at one version.
//!
//! ## Responsibilities
//! - Point lookups of (key, subkey) and of whole keys
//! - Lazy enumeration of keys, and of a key's subkeys
//! - Keep the pinned index block and version alive until the last clone
//!   is dropped
//!
//! A snapshot never observes writes published after it was taken: every
//! lookup resolves chains at the snapshot version, and entries a snapshot
//! can reach are not reclaimed while it is alive.

mod iterator;

use std::fmt;
use std::sync::{Arc, Weak};

use crate::behavior::{Behavior, KeyDescriptor, KeyRef};
use crate::index::{IndexBlock, KeyState};
use crate::payload::VersionedPayloadHandle;
use crate::storage::Shared;

pub use iterator::{KeyIterator, SubkeyEntry, SubkeyIterator};

/// Version and counts captured when a snapshot was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub version: u64,

    /// Keys with at least one live subkey
    pub keys_count: usize,

    /// Live subkeys across all keys
    pub subkeys_count: usize,
}

/// Immutable state of a storage at one version.
///
/// Cloning is one reference count increment; the pin is released once,
/// when the last clone is dropped. Handles, key views and iterators borrow
/// the snapshot, so none of them can outlive it.
pub struct Snapshot<B: Behavior> {
    inner: Arc<SnapshotInner<B>>,
}

struct SnapshotInner<B: Behavior> {
    block: Arc<IndexBlock<B>>,
    info: SnapshotInfo,
    behavior: Arc<B>,
    storage: Weak<Shared<B>>,
}

impl<B: Behavior> Drop for SnapshotInner<B> {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.upgrade() {
            storage.release_pin(self.info.version);
        }
    }
}

/// A key present in a snapshot. Pass it to `Snapshot::subkeys` to walk its
/// subkeys without repeating the key lookup.
pub struct KeyView<'a, B: Behavior> {
    state: &'a KeyState<B>,
    subkeys_count: usize,
}

impl<'a, B: Behavior> KeyView<'a, B> {
    pub fn key(&self) -> &'a B::Key {
        self.state.key()
    }

    /// Live subkeys of this key at the snapshot version.
    pub fn subkeys_count(&self) -> usize {
        self.subkeys_count
    }
}

impl<B: Behavior> Clone for KeyView<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Behavior> Copy for KeyView<'_, B> {}

impl<B: Behavior> fmt::Debug for KeyView<'_, B>
where
    B::Key: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyView")
            .field("key", self.key())
            .field("subkeys_count", &self.subkeys_count)
            .finish()
    }
}

impl<B: Behavior> Snapshot<B> {
    /// Wrap an already registered pin.
    pub(crate) fn new(
        block: Arc<IndexBlock<B>>,
        info: SnapshotInfo,
        behavior: Arc<B>,
        storage: Weak<Shared<B>>,
    ) -> Self {
        Self {
            inner: Arc::new(SnapshotInner {
                block,
                info,
                behavior,
                storage,
            }),
        }
    }

    pub fn version(&self) -> u64 {
        self.inner.info.version
    }

    pub fn keys_count(&self) -> usize {
        self.inner.info.keys_count
    }

    pub fn subkeys_count(&self) -> usize {
        self.inner.info.subkeys_count
    }

    pub fn info(&self) -> &SnapshotInfo {
        &self.inner.info
    }

    pub fn behavior(&self) -> &B {
        &self.inner.behavior
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Payload of (key, subkey) at this version; empty if absent.
    pub fn get(&self, key: &B::Key, subkey: u64) -> VersionedPayloadHandle<'_, B::Payload> {
        self.get_by(&KeyRef::new(self.behavior(), key), subkey)
    }

    pub fn get_by<D>(&self, descriptor: &D, subkey: u64) -> VersionedPayloadHandle<'_, B::Payload>
    where
        D: KeyDescriptor<B::Key> + ?Sized,
    {
        let version = self.version();
        self.inner
            .block
            .find(descriptor)
            .and_then(|state| state.find_subkey(subkey))
            .and_then(|state| state.payload_at(version))
            .map_or_else(VersionedPayloadHandle::empty, |(written, payload)| {
                VersionedPayloadHandle::new(written, payload)
            })
    }

    /// Owned copy of the payload, acquired through the behavior so it can
    /// outlive this snapshot.
    pub fn get_owned(&self, key: &B::Key, subkey: u64) -> Option<(u64, B::Payload)> {
        let handle = self.get(key, subkey);
        handle
            .payload()
            .map(|payload| (handle.version(), self.behavior().acquire_payload(payload)))
    }

    /// The key, if it has at least one live subkey at this version.
    pub fn get_key(&self, key: &B::Key) -> Option<KeyView<'_, B>> {
        self.get_key_by(&KeyRef::new(self.behavior(), key))
    }

    pub fn get_key_by<D>(&self, descriptor: &D) -> Option<KeyView<'_, B>>
    where
        D: KeyDescriptor<B::Key> + ?Sized,
    {
        let state = self.inner.block.find(descriptor)?;
        let subkeys_count = state.subkeys_count_at(self.version());
        (subkeys_count > 0).then_some(KeyView {
            state,
            subkeys_count,
        })
    }

    /// Live subkeys of `key` at this version; 0 if the key is absent.
    pub fn subkeys_count_of(&self, key: &B::Key) -> usize {
        self.subkeys_count_by(&KeyRef::new(self.behavior(), key))
    }

    pub fn subkeys_count_by<D>(&self, descriptor: &D) -> usize
    where
        D: KeyDescriptor<B::Key> + ?Sized,
    {
        self.inner
            .block
            .find(descriptor)
            .map_or(0, |state| state.subkeys_count_at(self.version()))
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Keys present at this version, in index order. Calling again restarts
    /// the walk.
    pub fn keys(&self) -> KeyIterator<'_, B> {
        KeyIterator::new(&self.inner.block, self.inner.info)
    }

    /// Subkeys of `key` holding a payload at this version.
    pub fn subkeys<'a>(&'a self, key: &KeyView<'a, B>) -> SubkeyIterator<'a, B> {
        SubkeyIterator::new(key.state, key.subkeys_count, self.version())
    }
}

impl<B: Behavior> Clone for Snapshot<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<'a, B: Behavior> IntoIterator for &'a Snapshot<B> {
    type Item = KeyView<'a, B>;
    type IntoIter = KeyIterator<'a, B>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys()
    }
}

impl<B: Behavior> fmt::Debug for Snapshot<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.inner.info.version)
            .field("keys_count", &self.inner.info.keys_count)
            .field("subkeys_count", &self.inner.info.subkeys_count)
            .field("block", &self.inner.block.id())
            .finish()
    }
}
