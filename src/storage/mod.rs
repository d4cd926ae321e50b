//! Storage Module
//!
//! The writer side of the engine.
//!
//! ## Responsibilities
//! - Assign versions and append entries (put / delete / delete_key / batches)
//! - Publish (index block, version, counts) atomically for snapshots
//! - Rotate to a new index block when the current one fills up
//! - Reclaim history once no live snapshot can observe it
//!
//! ## Version lifecycle
//! ```text
//!  writer lock ──► resolve states ──► append @ v+1 ──► publish v+1 ──► reclaim
//!                   (may rotate)                        (registry lock)
//!
//!  snapshot() ──► registry lock: pin(version, block) ──► reads (lock-free)
//!  drop(last clone) ──► unpin ──► oldest moved? ──► try writer lock ──► reclaim
//! ```

mod batch;
pub(crate) mod metrics;
mod reclaim;
mod store;
mod writer;

pub use batch::{BatchOutcome, WriteBatch};
pub use metrics::StorageStats;
pub use store::Storage;

pub(crate) use store::Shared;
