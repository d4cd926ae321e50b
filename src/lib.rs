//! # vstore
//!
//! An in-process multi-version key/value store:
//! - Keys map to sets of `u64` subkeys, each holding a payload history
//! - Snapshot isolation: readers see one version, never a partial write
//! - Single-writer/multi-reader concurrency model; reads never lock
//! - Lazy reclamation of history no live snapshot can reach
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Storage                               │
//! │         writer lock ──► Writer ──► TrimQueue                 │
//! │         registry lock ──► published (block, info) + pins     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Arc<IndexBlock>
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Snapshot   │   ...    │  Snapshot   │
//!   │ (version v) │          │ (version w) │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬────────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │   IndexBlock    │  key ──► subkey ──► version chain
//!              └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use bytes::Bytes;
//! use vstore::{BytesBehavior, Storage};
//!
//! let storage = Storage::new(BytesBehavior::new()).unwrap();
//! let key = Bytes::from_static(b"K1");
//!
//! storage.put(key.clone(), 1, Bytes::from_static(b"a")).unwrap();
//! let before = storage.snapshot();
//! storage.put(key.clone(), 1, Bytes::from_static(b"b")).unwrap();
//!
//! assert_eq!(before.get(&key, 1).payload().map(|p| &p[..]), Some(&b"a"[..]));
//! assert_eq!(storage.snapshot().get(&key, 1).version(), 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod behavior;
pub mod config;
pub mod error;
pub mod payload;
pub mod snapshot;
pub mod storage;

mod chain;
mod index;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use behavior::{Behavior, BytesBehavior, HashedBehavior, KeyDescriptor, KeyRef};
pub use config::{Config, ConfigBuilder};
pub use error::{Result, StorageError};
pub use payload::VersionedPayloadHandle;
pub use snapshot::{KeyIterator, KeyView, Snapshot, SnapshotInfo, SubkeyEntry, SubkeyIterator};
pub use storage::{BatchOutcome, Storage, StorageStats, WriteBatch};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of vstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
