//! Pins and reclamation
//!
//! ## Pin registry
//! Holds the published (block, info) pair and how many snapshot pins exist
//! per version. Taking a snapshot reads the pair and registers its pin in one
//! critical section, so the writer never computes an oldest needed version
//! above a snapshot that is being handed out.
//!
//! ## Trim queue
//! Every append that supersedes an older entry queues its chain, tagged with
//! the superseding version. Tags only grow, so a pass pops from the front
//! until it meets a tag above the oldest needed version.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::behavior::Behavior;
use crate::chain::VersionChain;
use crate::index::{IndexBlock, SubkeyState};
use crate::snapshot::SnapshotInfo;

pub(crate) struct PinRegistry<B: Behavior> {
    current: Arc<IndexBlock<B>>,
    info: SnapshotInfo,
    /// version → live pins
    pins: BTreeMap<u64, usize>,
}

impl<B: Behavior> PinRegistry<B> {
    pub(crate) fn new(current: Arc<IndexBlock<B>>, info: SnapshotInfo) -> Self {
        Self {
            current,
            info,
            pins: BTreeMap::new(),
        }
    }

    pub(crate) fn info(&self) -> SnapshotInfo {
        self.info
    }

    /// Replace the published pair, handing back the previous block so the
    /// caller can drop it outside the lock.
    pub(crate) fn publish(
        &mut self,
        block: Arc<IndexBlock<B>>,
        info: SnapshotInfo,
    ) -> Arc<IndexBlock<B>> {
        self.info = info;
        std::mem::replace(&mut self.current, block)
    }

    pub(crate) fn pin(&mut self) -> (Arc<IndexBlock<B>>, SnapshotInfo) {
        *self.pins.entry(self.info.version).or_insert(0) += 1;
        (Arc::clone(&self.current), self.info)
    }

    /// Drop one pin. Returns true if the oldest pinned version moved.
    pub(crate) fn unpin(&mut self, version: u64) -> bool {
        let oldest = self.oldest_pinned();
        let Some(count) = self.pins.get_mut(&version) else {
            debug_assert!(false, "unpinned version {version} was never pinned");
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.pins.remove(&version);
            return oldest == Some(version);
        }
        false
    }

    pub(crate) fn oldest_pinned(&self) -> Option<u64> {
        self.pins.keys().next().copied()
    }

    /// Oldest version any present or future snapshot can read.
    pub(crate) fn oldest_needed(&self) -> u64 {
        self.oldest_pinned().unwrap_or(self.info.version)
    }

    pub(crate) fn live_snapshots(&self) -> usize {
        self.pins.values().sum()
    }
}

enum TrimTask<B: Behavior> {
    Payloads {
        superseded_at: u64,
        state: Arc<SubkeyState<B>>,
    },
    Counts {
        superseded_at: u64,
        chain: Arc<VersionChain<usize>>,
    },
}

impl<B: Behavior> TrimTask<B> {
    fn superseded_at(&self) -> u64 {
        match self {
            TrimTask::Payloads { superseded_at, .. } | TrimTask::Counts { superseded_at, .. } => {
                *superseded_at
            }
        }
    }
}

pub(crate) struct TrimQueue<B: Behavior> {
    tasks: VecDeque<TrimTask<B>>,
}

impl<B: Behavior> TrimQueue<B> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn push_payloads(&mut self, superseded_at: u64, state: Arc<SubkeyState<B>>) {
        self.tasks.push_back(TrimTask::Payloads {
            superseded_at,
            state,
        });
    }

    pub(crate) fn push_counts(&mut self, superseded_at: u64, chain: Arc<VersionChain<usize>>) {
        self.tasks.push_back(TrimTask::Counts {
            superseded_at,
            chain,
        });
    }

    /// Trim every queued chain superseded at or before `oldest`, releasing
    /// payloads through `behavior`. Returns the number of entries freed.
    ///
    /// Must run under the writer lock with `oldest` taken from the pin
    /// registry after the last publication.
    pub(crate) fn run(&mut self, oldest: u64, behavior: &B) -> usize {
        let mut freed = 0;
        while self
            .tasks
            .front()
            .is_some_and(|task| task.superseded_at() <= oldest)
        {
            let Some(task) = self.tasks.pop_front() else {
                break;
            };
            match task {
                TrimTask::Payloads { state, .. } => {
                    // SAFETY: every pinned snapshot reads at or above `oldest`,
                    // and new snapshots read the published version, which is
                    // not below it.
                    let released = unsafe { state.chain().trim(oldest) };
                    freed += released.len();
                    for payload in released.into_iter().flatten() {
                        behavior.release_payload(payload);
                    }
                }
                TrimTask::Counts { chain, .. } => {
                    // SAFETY: as above.
                    freed += unsafe { chain.trim(oldest) }.len();
                }
            }
        }
        freed
    }
}
