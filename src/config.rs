//! Configuration for vstore
//!
//! Centralized configuration with sensible defaults.

use crate::error::{Result, StorageError};

/// Main configuration for a Storage instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Number of key slots in the first index block.
    /// Rounded up to a power of two.
    pub initial_key_capacity: usize,

    /// Number of subkey slots allocated for a new key.
    /// Rounded up to a power of two.
    pub initial_subkey_capacity: usize,

    /// Fill percentage at which a slot table stops accepting entries
    /// (keys: the block rotates; subkeys: an overflow table is chained).
    pub max_load_percent: u8,

    // -------------------------------------------------------------------------
    // Rotation / Reclamation Configuration
    // -------------------------------------------------------------------------
    /// Overflow subkey tables allowed since the current block was sealed
    /// before the writer rotates to a consolidated block.
    pub max_pending_overflows: usize,

    /// Tombstones appended since the current block was sealed before the
    /// writer rotates and drops dead subkeys. The effective threshold is the
    /// larger of this and the subkey states the block was sealed with.
    pub max_pending_tombstones: usize,

    /// Run a reclamation pass from the thread that releases the oldest
    /// snapshot, when the writer lock is free.
    pub reclaim_on_release: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_key_capacity: 64,
            initial_subkey_capacity: 4,
            max_load_percent: 75,
            max_pending_overflows: 256,
            max_pending_tombstones: 1024,
            reclaim_on_release: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the values can drive the index.
    pub fn validate(&self) -> Result<()> {
        if self.initial_key_capacity == 0 {
            return Err(StorageError::Config(
                "initial_key_capacity must be greater than zero".to_string(),
            ));
        }
        if self.initial_subkey_capacity == 0 {
            return Err(StorageError::Config(
                "initial_subkey_capacity must be greater than zero".to_string(),
            ));
        }
        if !(10..=95).contains(&self.max_load_percent) {
            return Err(StorageError::Config(format!(
                "max_load_percent must be within 10..=95, got {}",
                self.max_load_percent
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the key slot count of the first index block
    pub fn initial_key_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_key_capacity = capacity;
        self
    }

    /// Set the subkey slot count of a new key
    pub fn initial_subkey_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_subkey_capacity = capacity;
        self
    }

    /// Set the slot table fill limit (percent)
    pub fn max_load_percent(mut self, percent: u8) -> Self {
        self.config.max_load_percent = percent;
        self
    }

    /// Set how many overflow tables trigger a rotation
    pub fn max_pending_overflows(mut self, count: usize) -> Self {
        self.config.max_pending_overflows = count;
        self
    }

    /// Set how many tombstones trigger a rotation
    pub fn max_pending_tombstones(mut self, count: usize) -> Self {
        self.config.max_pending_tombstones = count;
        self
    }

    /// Enable or disable reclamation on snapshot release
    pub fn reclaim_on_release(mut self, enabled: bool) -> Self {
        self.config.reclaim_on_release = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
