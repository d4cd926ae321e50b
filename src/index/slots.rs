//! Slot Table
//!
//! Open-addressing hash table whose slots are written at most once.
//!
//! Readers probe without locking: a slot is either empty or holds a value
//! that never changes. The writer fills empty slots and, when a table is at
//! its load limit, may chain a larger overflow table behind it. Nothing is
//! ever removed; consolidation happens by building a new table.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::error::Result;

const MIN_CAPACITY: usize = 4;

/// Finalizer from splitmix64; spreads user hashes over the low bits.
pub(crate) fn mix(hash: u64) -> u64 {
    let mut z = hash;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

pub(crate) struct SlotTable<T> {
    slots: Box<[OnceLock<T>]>,
    len: AtomicUsize,
    limit: usize,
    max_load_percent: u8,
    overflow: OnceLock<Box<SlotTable<T>>>,
}

/// Where `SlotTable::insert` placed a value.
pub(crate) struct Inserted<'a, T> {
    pub(crate) value: &'a T,
    /// A new overflow table had to be allocated.
    pub(crate) grew: bool,
}

impl<T> SlotTable<T> {
    /// Table with at least `capacity` slots that accepts entries until it is
    /// `max_load_percent` full.
    pub(crate) fn with_capacity(capacity: usize, max_load_percent: u8) -> Result<Self> {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, OnceLock::new);

        let limit = (capacity * max_load_percent as usize / 100).clamp(1, capacity - 1);
        Ok(Self {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
            limit,
            max_load_percent,
            overflow: OnceLock::new(),
        })
    }

    /// Smallest table that holds `count` entries below the load limit.
    pub(crate) fn sized_for(count: usize, min_capacity: usize, max_load_percent: u8) -> Result<Self> {
        let mut capacity = min_capacity.max(MIN_CAPACITY).next_power_of_two();
        while capacity * max_load_percent as usize / 100 <= count {
            capacity *= 2;
        }
        Self::with_capacity(capacity, max_load_percent)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Entries in this table and its overflow tables.
    pub(crate) fn len(&self) -> usize {
        let own = self.len.load(Ordering::Acquire);
        own + self.overflow.get().map_or(0, |table| table.len())
    }

    /// Number of tables in the overflow chain, this one included.
    pub(crate) fn depth(&self) -> usize {
        1 + self.overflow.get().map_or(0, |table| table.depth())
    }

    /// True once this table (ignoring overflow) reached its load limit.
    pub(crate) fn is_at_limit(&self) -> bool {
        self.len.load(Ordering::Acquire) >= self.limit
    }

    pub(crate) fn find(&self, hash: u64, mut matches: impl FnMut(&T) -> bool) -> Option<&T> {
        let mut table = Some(self);
        while let Some(current) = table {
            if let Some(found) = current.probe(hash, &mut matches) {
                return Some(found);
            }
            table = current.overflow.get().map(|next| &**next);
        }
        None
    }

    fn probe(&self, hash: u64, matches: &mut impl FnMut(&T) -> bool) -> Option<&T> {
        let mask = self.slots.len() - 1;
        let start = mix(hash) as usize & mask;
        for step in 0..self.slots.len() {
            match self.slots[(start + step) & mask].get() {
                Some(value) if matches(value) => return Some(value),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    /// Store a value that is not present yet. Writer only.
    ///
    /// `allow_overflow = false` assumes the caller checked `is_at_limit`.
    pub(crate) fn insert(&self, hash: u64, value: T, allow_overflow: bool) -> Result<Inserted<'_, T>> {
        if !self.is_at_limit() || !allow_overflow {
            let value = self.place(hash, value);
            return Ok(Inserted { value, grew: false });
        }

        let mut grew = false;
        let overflow = match self.overflow.get() {
            Some(table) => table,
            None => {
                let next = SlotTable::with_capacity(self.slots.len() * 2, self.max_load_percent)?;
                grew = true;
                self.overflow.get_or_init(move || Box::new(next))
            }
        };
        let inserted = overflow.insert(hash, value, true)?;
        Ok(Inserted {
            value: inserted.value,
            grew: grew || inserted.grew,
        })
    }

    fn place(&self, hash: u64, value: T) -> &T {
        let mask = self.slots.len() - 1;
        let start = mix(hash) as usize & mask;
        for step in 0..self.slots.len() {
            let slot = &self.slots[(start + step) & mask];
            if slot.get().is_none() {
                let stored = slot.get_or_init(move || value);
                self.len.fetch_add(1, Ordering::Release);
                return stored;
            }
        }
        // The load limit keeps at least one slot free.
        unreachable!("slot table has no free slot")
    }

    pub(crate) fn iter(&self) -> SlotIter<'_, T> {
        SlotIter {
            table: Some(self),
            index: 0,
        }
    }
}

/// Walks filled slots in slot order, then the overflow tables.
pub(crate) struct SlotIter<'a, T> {
    table: Option<&'a SlotTable<T>>,
    index: usize,
}

impl<'a, T> Iterator for SlotIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        while let Some(table) = self.table {
            while self.index < table.slots.len() {
                let slot = &table.slots[self.index];
                self.index += 1;
                if let Some(value) = slot.get() {
                    return Some(value);
                }
            }
            self.table = table.overflow.get().map(|next| &**next);
            self.index = 0;
        }
        None
    }
}
