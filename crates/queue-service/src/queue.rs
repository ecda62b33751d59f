//! FIFO admission queue with amortized O(1) removal by id.
//!
//! Backed by a deque of slots addressed by absolute sequence numbers. Removing
//! an id tombstones its slot through the index; tombstones are skipped on
//! `pop_front` and squeezed out by compaction once they outnumber live entries.

use common::types::ClientId;

use std::collections::{HashMap, VecDeque};

/// Tombstone count below which compaction is never attempted.
const COMPACTION_MIN_TOMBSTONES: usize = 32;

/// Ordered collection of waiting client ids.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    /// Slots in arrival order; `None` marks a removed entry.
    slots: VecDeque<Option<ClientId>>,
    /// Absolute sequence number of `slots[0]`.
    head_seq: u64,
    /// Client id to absolute sequence number.
    index: HashMap<ClientId, u64>,
    /// Number of `None` slots currently in `slots`.
    tombstones: usize,
}

impl AdmissionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` at the tail. Returns `false` if it is already queued.
    pub fn enqueue(&mut self, id: ClientId) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }

        let seq = self.head_seq + self.slots.len() as u64;
        self.slots.push_back(Some(id));
        self.index.insert(id, seq);
        true
    }

    /// Remove `id` from any position. Returns `false` if it was not queued.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        let Some(seq) = self.index.remove(id) else {
            return false;
        };

        let offset = usize::try_from(seq - self.head_seq).unwrap_or(usize::MAX);
        if let Some(slot) = self.slots.get_mut(offset) {
            *slot = None;
            self.tombstones += 1;
        }

        self.trim_front();
        self.maybe_compact();
        true
    }

    /// 1-based position of `id`, or `None` if it is not queued.
    #[must_use]
    pub fn position_of(&self, id: &ClientId) -> Option<usize> {
        let seq = *self.index.get(id)?;
        let offset = usize::try_from(seq - self.head_seq).ok()?;
        let ahead = self.slots.range(..offset).filter(|slot| slot.is_some()).count();
        Some(ahead + 1)
    }

    /// Remove and return the head of the queue.
    pub fn pop_front(&mut self) -> Option<ClientId> {
        while let Some(slot) = self.slots.pop_front() {
            self.head_seq += 1;
            match slot {
                Some(id) => {
                    self.index.remove(&id);
                    return Some(id);
                }
                None => self.tombstones -= 1,
            }
        }
        None
    }

    /// Number of queued clients.
    #[must_use]
    pub fn size(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.index.contains_key(id)
    }

    /// Queued ids in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }

    fn trim_front(&mut self) {
        while let Some(None) = self.slots.front() {
            self.slots.pop_front();
            self.head_seq += 1;
            self.tombstones -= 1;
        }
    }

    fn maybe_compact(&mut self) {
        if self.tombstones < COMPACTION_MIN_TOMBSTONES || self.tombstones * 2 < self.slots.len() {
            return;
        }

        // Renumber live entries from the current head so existing offsets stay valid.
        let live: VecDeque<Option<ClientId>> =
            self.slots.drain(..).filter(Option::is_some).collect();
        for (offset, id) in live.iter().flatten().enumerate() {
            self.index.insert(*id, self.head_seq + offset as u64);
        }
        self.slots = live;
        self.tombstones = 0;
    }
}
