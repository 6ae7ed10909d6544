//! Groups per-gateway observations of the same logical packet.
//!
//! The same transmission is heard by every gateway in range, so the queue is
//! keyed by packet id rather than by gateway. A group collects observations
//! until the scheduler drains it; after that the id is free again and a late
//! observation starts a new, independent group.

use crate::clock::Timestamp;
use crate::envelope::Envelope;
use crate::metrics_defs::{GROUPS_CREATED, PENDING_GROUPS};
use indexmap::IndexMap;
use parking_lot::Mutex;
use shared::{counter, gauge};

/// All observations of one logical packet collected within one window.
#[derive(Clone, Debug, PartialEq)]
pub struct PacketGroup {
    id: u32,
    first_seen_at: Timestamp,
    envelopes: Vec<Envelope>,
}

impl PacketGroup {
    fn new(envelope: Envelope) -> Self {
        PacketGroup {
            id: envelope.packet_id(),
            first_seen_at: envelope.received_at(),
            envelopes: vec![envelope],
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn first_seen_at(&self) -> Timestamp {
        self.first_seen_at
    }

    /// Observations in arrival order.
    pub fn envelopes(&self) -> &[Envelope] {
        &self.envelopes
    }

    /// The first observation. A group is never empty.
    pub fn first(&self) -> &Envelope {
        &self.envelopes[0]
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn into_envelopes(self) -> Vec<Envelope> {
        self.envelopes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Created,
    Appended,
}

/// Pending packet groups keyed by packet id, in creation order.
///
/// The mutex serializes the ingest worker's `add` with the scheduler's drain,
/// so a drain never sees a group halfway through an append.
#[derive(Debug, Default)]
pub struct GroupingQueue {
    groups: Mutex<IndexMap<u32, PacketGroup>>,
}

impl GroupingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a group for this packet id is pending.
    pub fn exists(&self, packet_id: u32) -> bool {
        self.groups.lock().contains_key(&packet_id)
    }

    /// Appends to the pending group for the envelope's packet id, or starts a
    /// new group stamped with the envelope's receipt time.
    pub fn add(&self, envelope: Envelope) -> AddOutcome {
        let mut groups = self.groups.lock();

        let outcome = match groups.get_mut(&envelope.packet_id()) {
            Some(group) => {
                group.envelopes.push(envelope);
                AddOutcome::Appended
            }
            None => {
                groups.insert(envelope.packet_id(), PacketGroup::new(envelope));
                counter!(GROUPS_CREATED).increment(1);
                AddOutcome::Created
            }
        };

        gauge!(PENDING_GROUPS).set(groups.len() as f64);
        outcome
    }

    /// Removes and returns every group first seen strictly before `cutoff`,
    /// oldest first. Younger groups stay pending.
    pub fn pop_packet_groups_older_than(&self, cutoff: Timestamp) -> Vec<PacketGroup> {
        let mut groups = self.groups.lock();

        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut *groups)
            .into_iter()
            .partition(|(_, group)| group.first_seen_at < cutoff);
        *groups = pending.into_iter().collect();

        gauge!(PENDING_GROUPS).set(groups.len() as f64);
        ready.into_iter().map(|(_, group)| group).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }
}
