//! Generic behavior over `std::hash::Hash` keys and `Clone` payloads.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use super::Behavior;

/// Behavior for any `Hash + Eq` key and `Clone` payload.
///
/// Acquire clones the payload; release drops it.
pub struct HashedBehavior<K, P> {
    hasher: RandomState,
    _types: PhantomData<fn() -> (K, P)>,
}

impl<K, P> HashedBehavior<K, P> {
    pub fn new() -> Self {
        Self {
            hasher: RandomState::new(),
            _types: PhantomData,
        }
    }
}

impl<K, P> Default for HashedBehavior<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> fmt::Debug for HashedBehavior<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedBehavior").finish_non_exhaustive()
    }
}

impl<K, P> Behavior for HashedBehavior<K, P>
where
    K: Hash + Eq + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    type Key = K;
    type Payload = P;

    fn hash_key(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    fn keys_equal(&self, a: &K, b: &K) -> bool {
        a == b
    }

    fn acquire_payload(&self, payload: &P) -> P {
        payload.clone()
    }

    fn release_payload(&self, payload: P) {
        drop(payload);
    }
}
