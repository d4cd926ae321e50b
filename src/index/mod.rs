//! Index Module
//!
//! The key → subkey → version chain structure that snapshots pin.
//!
//! ## Layout
//! ```text
//! IndexBlock (Arc, shared by the writer and snapshots)
//!   └── SlotTable<Arc<KeyState>>
//!         ├── key, hash
//!         ├── counts: VersionChain<usize>     (live subkeys per version)
//!         └── SlotTable<Arc<SubkeyState>>     (+ overflow tables)
//!               └── VersionChain<Option<Payload>>   (None = tombstone)
//! ```
//!
//! ## Immutability
//! A block never rewrites a filled slot. The writer may fill empty slots
//! with keys/subkeys whose entries are all newer than any published
//! version, so a reader never observes them. Anything else (consolidating
//! overflow tables, dropping dead keys, growing the key table) produces a
//! new block; chains and count histories are shared between blocks by `Arc`.

mod block;
mod key_state;
pub(crate) mod slots;

pub(crate) use block::IndexBlock;
pub(crate) use key_state::{KeyState, SubkeyState};
