//! Byte-string behavior
//!
//! Keys and payloads are `Bytes`, so acquiring a payload is a reference
//! count bump and releasing it is a drop.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

use bytes::Bytes;

use super::Behavior;

/// Behavior for `Bytes` keys and payloads.
#[derive(Debug, Default, Clone)]
pub struct BytesBehavior {
    hasher: RandomState,
}

impl BytesBehavior {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Behavior for BytesBehavior {
    type Key = Bytes;
    type Payload = Bytes;

    fn hash_key(&self, key: &Bytes) -> u64 {
        self.hasher.hash_one(key.as_ref())
    }

    fn keys_equal(&self, a: &Bytes, b: &Bytes) -> bool {
        a == b
    }

    fn acquire_payload(&self, payload: &Bytes) -> Bytes {
        payload.clone()
    }

    fn release_payload(&self, payload: Bytes) {
        drop(payload);
    }
}
