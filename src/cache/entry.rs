// Arena-backed cache entries and the intrusive LRU list threaded through them.
//
// The source implementation links entries with raw prev/next pointers. Here
// the arena is a `Vec<Slot>` and links are indices into it, so there is no
// unsafe pointer chasing: removing an entry just returns its slot to
// `free_slots` for reuse, the classic slotmap pattern.

use bytes::Bytes;
use std::time::{Duration, Instant};

pub(crate) enum Slot {
    Occupied(CacheEntry),
    Vacant,
}

/// One resident (or in-flight) key in a cache.
pub struct CacheEntry {
    pub(crate) key: String,
    pub(crate) value: Option<Bytes>,
    pub(crate) expires_at: Option<Instant>,
    pub(crate) cost: Duration,
    pub(crate) reuse_count: u64,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

impl CacheEntry {
    pub(crate) fn new(key: String) -> Self {
        Self {
            key,
            value: None,
            expires_at: None,
            cost: Duration::ZERO,
            reuse_count: 0,
            prev: None,
            next: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.value.is_none()
    }

    pub fn size(&self) -> usize {
        self.value.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if now >= t)
    }

    pub fn reuse_count(&self) -> u64 {
        self.reuse_count
    }

    pub fn cost(&self) -> Duration {
        self.cost
    }
}

/// Arena of entries plus an intrusive doubly linked LRU list over them.
/// `head` is the most-recently-used end, `tail` the least-recently-used end.
#[derive(Default)]
pub(crate) struct EntryArena {
    pub(crate) slots: Vec<Slot>,
    pub(crate) free_slots: Vec<usize>,
    pub(crate) head: Option<usize>,
    pub(crate) tail: Option<usize>,
}

impl EntryArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, idx: usize) -> &CacheEntry {
        match &self.slots[idx] {
            Slot::Occupied(e) => e,
            Slot::Vacant => panic!("servcore cache: dangling slot index {idx}"),
        }
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut CacheEntry {
        match &mut self.slots[idx] {
            Slot::Occupied(e) => e,
            Slot::Vacant => panic!("servcore cache: dangling slot index {idx}"),
        }
    }

    pub(crate) fn insert(&mut self, entry: CacheEntry) -> usize {
        if let Some(idx) = self.free_slots.pop() {
            self.slots[idx] = Slot::Occupied(entry);
            idx
        } else {
            self.slots.push(Slot::Occupied(entry));
            self.slots.len() - 1
        }
    }

    /// Detach `idx` from the LRU list without removing it from the arena.
    pub(crate) fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let e = self.get(idx);
            (e.prev, e.next)
        };
        match prev {
            Some(p) => self.get_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.get_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let e = self.get_mut(idx);
        e.prev = None;
        e.next = None;
    }

    /// Link `idx` at the MRU (head) end. Assumes it is currently unlinked.
    pub(crate) fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        self.get_mut(idx).next = old_head;
        self.get_mut(idx).prev = None;
        match old_head {
            Some(h) => self.get_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    /// Move an already-linked entry to the MRU end.
    pub(crate) fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    /// Remove `idx` from the arena entirely, returning the evicted entry.
    pub(crate) fn remove(&mut self, idx: usize) -> CacheEntry {
        self.unlink(idx);
        let slot = std::mem::replace(&mut self.slots[idx], Slot::Vacant);
        self.free_slots.push(idx);
        match slot {
            Slot::Occupied(e) => e,
            Slot::Vacant => unreachable!(),
        }
    }
}
