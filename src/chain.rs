//! Version Chain
//!
//! Newest-first, append-only list of `(version, value)` entries.
//!
//! ## Concurrency
//! - One writer appends (`push`) and trims (`trim`); the caller serializes
//!   these behind the storage writer lock.
//! - Any number of readers walk the list with `at` / `latest` without
//!   locking. The head is published with a release store and read with an
//!   acquire load; entries are never edited or reordered once linked.
//!
//! ## Reclamation
//! A reader at version `v` stops at the first entry whose version is `<= v`
//! and never follows that entry's `prev` link. `trim(oldest)` only frees
//! entries behind the entry visible at `oldest`, so as long as no reader
//! works below `oldest` nothing it can reach is freed.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    version: u64,
    value: T,
    prev: AtomicPtr<Node<T>>,
}

pub(crate) struct VersionChain<T> {
    head: AtomicPtr<Node<T>>,
    _owns: PhantomData<Box<Node<T>>>,
}

// SAFETY: values are moved in by the writer thread and shared by reference
// with readers, which is exactly what `T: Send + Sync` permits.
unsafe impl<T: Send + Sync> Send for VersionChain<T> {}
unsafe impl<T: Send + Sync> Sync for VersionChain<T> {}

impl<T> VersionChain<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// Append an entry. Writer only.
    ///
    /// `version` must not be lower than the current head's version.
    pub(crate) fn push(&self, version: u64, value: T) {
        let head = self.head.load(Ordering::Acquire);
        debug_assert!(
            self.latest().map_or(true, |(latest, _)| latest <= version),
            "version chain must stay ordered"
        );
        let node = Box::into_raw(Box::new(Node {
            version,
            value,
            prev: AtomicPtr::new(head),
        }));
        self.head.store(node, Ordering::Release);
    }

    /// Newest entry, regardless of version.
    pub(crate) fn latest(&self) -> Option<(u64, &T)> {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: the head is never freed while the chain is alive.
        unsafe { head.as_ref() }.map(|node| (node.version, &node.value))
    }

    /// Newest entry with a version `<= version`.
    pub(crate) fn at(&self, version: u64) -> Option<(u64, &T)> {
        let mut current = self.head.load(Ordering::Acquire);
        // SAFETY: see the module docs; the walk stops at the first entry a
        // trim could have kept as its cut point.
        while let Some(node) = unsafe { current.as_ref() } {
            if node.version <= version {
                return Some((node.version, &node.value));
            }
            current = node.prev.load(Ordering::Acquire);
        }
        None
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Number of linked entries. Writer only.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut count = 0;
        let mut current = self.head.load(Ordering::Acquire);
        // SAFETY: writer-side walk; trimming is serialized with this call.
        while let Some(node) = unsafe { current.as_ref() } {
            count += 1;
            current = node.prev.load(Ordering::Acquire);
        }
        count
    }

    /// Unlink and return every entry older than the one visible at `oldest`.
    /// Writer only.
    ///
    /// # Safety
    /// No reader may be working at a version below `oldest`, now or later,
    /// and the writer must not hold references to entries older than the
    /// one visible at `oldest`.
    pub(crate) unsafe fn trim(&self, oldest: u64) -> Vec<T> {
        let mut current = self.head.load(Ordering::Acquire);
        while let Some(node) = current.as_ref() {
            if node.version <= oldest {
                let tail = node.prev.swap(ptr::null_mut(), Ordering::AcqRel);
                return Self::free_from(tail);
            }
            current = node.prev.load(Ordering::Acquire);
        }
        Vec::new()
    }

    /// Unlink and return every entry. Requires exclusive access.
    pub(crate) fn take_all(&mut self) -> Vec<T> {
        let head = std::mem::replace(self.head.get_mut(), ptr::null_mut());
        // SAFETY: `&mut self` proves no reader holds a reference.
        unsafe { Self::free_from(head) }
    }

    unsafe fn free_from(mut current: *mut Node<T>) -> Vec<T> {
        let mut values = Vec::new();
        while !current.is_null() {
            let node = Box::from_raw(current);
            current = node.prev.load(Ordering::Relaxed);
            values.push(node.value);
        }
        values
    }
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for VersionChain<T> {
    fn drop(&mut self) {
        drop(self.take_all());
    }
}
