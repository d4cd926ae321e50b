//! Versioned payload handles

use std::fmt;

/// A payload reference tagged with the version that made it visible.
///
/// An empty handle means "absent": the subkey never existed, or was deleted
/// at or before the snapshot version. The reference lives as long as the
/// snapshot it came from.
pub struct VersionedPayloadHandle<'a, P> {
    version: u64,
    payload: Option<&'a P>,
}

impl<'a, P> VersionedPayloadHandle<'a, P> {
    pub fn empty() -> Self {
        Self {
            version: 0,
            payload: None,
        }
    }

    pub(crate) fn new(version: u64, payload: &'a P) -> Self {
        Self {
            version,
            payload: Some(payload),
        }
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    /// Version at which the payload was written; 0 for an empty handle.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn payload(&self) -> Option<&'a P> {
        self.payload
    }
}

impl<P> Clone for VersionedPayloadHandle<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for VersionedPayloadHandle<'_, P> {}

impl<P> Default for VersionedPayloadHandle<'_, P> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<P: PartialEq> PartialEq for VersionedPayloadHandle<'_, P> {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.payload == other.payload
    }
}

impl<P: Eq> Eq for VersionedPayloadHandle<'_, P> {}

impl<P: fmt::Debug> fmt::Debug for VersionedPayloadHandle<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedPayloadHandle")
            .field("version", &self.version)
            .field("payload", &self.payload)
            .finish()
    }
}
