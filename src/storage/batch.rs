//! Write batches
//!
//! A batch groups operations that become visible under a single version,
//! optionally guarded by prerequisites checked against the latest state.

use crate::behavior::Behavior;

pub(crate) enum Operation<B: Behavior> {
    Put {
        key: B::Key,
        subkey: u64,
        payload: B::Payload,
    },
    Delete {
        key: B::Key,
        subkey: u64,
    },
    DeleteKey {
        key: B::Key,
    },
}

impl<B: Behavior> Operation<B> {
    pub(crate) fn into_payload(self) -> Option<B::Payload> {
        match self {
            Operation::Put { payload, .. } => Some(payload),
            Operation::Delete { .. } | Operation::DeleteKey { .. } => None,
        }
    }
}

pub(crate) enum Prerequisite<B: Behavior> {
    /// The subkey's live payload was written at exactly `version`
    /// (`None`: the subkey has no live payload).
    SubkeyVersion {
        key: B::Key,
        subkey: u64,
        version: Option<u64>,
    },
    /// The key has exactly `count` live subkeys.
    SubkeysCount { key: B::Key, count: usize },
}

/// Operations applied atomically under one version.
///
/// Operations run in insertion order; a later operation on the same subkey
/// wins. A snapshot sees either every operation of the batch or none.
pub struct WriteBatch<B: Behavior> {
    operations: Vec<Operation<B>>,
    prerequisites: Vec<Prerequisite<B>>,
}

impl<B: Behavior> WriteBatch<B> {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            prerequisites: Vec::new(),
        }
    }

    /// Store `payload` under (key, subkey)
    pub fn put(&mut self, key: B::Key, subkey: u64, payload: B::Payload) -> &mut Self {
        self.operations.push(Operation::Put {
            key,
            subkey,
            payload,
        });
        self
    }

    /// Tombstone (key, subkey)
    pub fn delete(&mut self, key: B::Key, subkey: u64) -> &mut Self {
        self.operations.push(Operation::Delete { key, subkey });
        self
    }

    /// Tombstone every live subkey of `key`
    pub fn delete_key(&mut self, key: B::Key) -> &mut Self {
        self.operations.push(Operation::DeleteKey { key });
        self
    }

    /// Apply only if the subkey's live payload was written at `version`
    /// (`None` requires the subkey to be absent).
    pub fn require_subkey_version(
        &mut self,
        key: B::Key,
        subkey: u64,
        version: Option<u64>,
    ) -> &mut Self {
        self.prerequisites.push(Prerequisite::SubkeyVersion {
            key,
            subkey,
            version,
        });
        self
    }

    /// Apply only if `key` has exactly `count` live subkeys.
    pub fn require_subkeys_count(&mut self, key: B::Key, count: usize) -> &mut Self {
        self.prerequisites
            .push(Prerequisite::SubkeysCount { key, count });
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Operation<B>>, Vec<Prerequisite<B>>) {
        (self.operations, self.prerequisites)
    }
}

impl<B: Behavior> Default for WriteBatch<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of `Storage::apply`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every operation is visible from `version` on.
    Applied { version: u64 },

    /// A prerequisite did not hold; nothing was applied and the version did
    /// not move.
    PrerequisitesFailed,
}

impl BatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, BatchOutcome::Applied { .. })
    }

    pub fn version(&self) -> Option<u64> {
        match self {
            BatchOutcome::Applied { version } => Some(*version),
            BatchOutcome::PrerequisitesFailed => None,
        }
    }
}
