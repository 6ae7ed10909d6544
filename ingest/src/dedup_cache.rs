// Bounded FIFO set of recently seen envelope fingerprints. Membership checks
// never reorder entries; once full, each insert evicts the oldest entry.
use crate::fingerprint::Fingerprint;
use crate::metrics_defs::DEDUP_EVICTIONS;
use indexmap::IndexSet;
use shared::counter;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct DedupCache {
    entries: IndexSet<Fingerprint>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DedupCache {
            entries: IndexSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains(fingerprint)
    }

    /// Returns true if the fingerprint was not already present.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if self.entries.contains(&fingerprint) {
            return false;
        }

        if self.entries.len() >= self.capacity {
            // shift_remove keeps the remaining entries in insertion order
            self.entries.shift_remove_index(0);
            counter!(DEDUP_EVICTIONS).increment(1);
        }

        self.entries.insert(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
