//! Behavior Module
//!
//! The capability a Storage is parametrized over.
//!
//! ## Responsibilities
//! - Hash and compare keys (the core never looks inside a key)
//! - Duplicate and release payloads
//!
//! ## Contract
//! - Equal keys must hash equally. A behavior that breaks this gets
//!   undefined lookup results; nothing checks it at runtime.
//! - Methods may be called concurrently from any reader or the writer.
//! - Every payload moved into a Storage is passed to `release_payload`
//!   exactly once, when the last entry referencing it is reclaimed. Payloads
//!   of a batch that is not applied are released before `apply` returns.

mod byte_string;
mod hashed;

pub use byte_string::BytesBehavior;
pub use hashed::HashedBehavior;

/// Key hashing/equality and payload lifetime policy.
pub trait Behavior: Send + Sync + 'static {
    /// Stored key type
    type Key: Send + Sync + 'static;

    /// Stored payload type
    type Payload: Send + Sync + 'static;

    /// Hash of a key. Must agree with `keys_equal`.
    fn hash_key(&self, key: &Self::Key) -> u64;

    /// Key equality.
    fn keys_equal(&self, a: &Self::Key, b: &Self::Key) -> bool;

    /// Produce a second owned reference to a payload.
    fn acquire_payload(&self, payload: &Self::Payload) -> Self::Payload;

    /// Give up ownership of a payload the storage no longer references.
    fn release_payload(&self, payload: Self::Payload);
}

/// A lookup token: a precomputed hash plus an equality test against
/// stored keys.
///
/// Lets callers look keys up without materializing a full key object.
pub trait KeyDescriptor<K: ?Sized> {
    fn key_hash(&self) -> u64;

    fn matches(&self, stored: &K) -> bool;
}

/// Descriptor for a concrete key, hashed through a behavior once.
pub struct KeyRef<'a, B: Behavior> {
    behavior: &'a B,
    key: &'a B::Key,
    hash: u64,
}

impl<'a, B: Behavior> KeyRef<'a, B> {
    pub fn new(behavior: &'a B, key: &'a B::Key) -> Self {
        Self {
            behavior,
            key,
            hash: behavior.hash_key(key),
        }
    }

    pub fn key(&self) -> &'a B::Key {
        self.key
    }
}

impl<B: Behavior> KeyDescriptor<B::Key> for KeyRef<'_, B> {
    fn key_hash(&self) -> u64 {
        self.hash
    }

    fn matches(&self, stored: &B::Key) -> bool {
        self.behavior.keys_equal(self.key, stored)
    }
}
