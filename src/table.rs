//! Bounded membership table: merge, eviction, expiry and probe selection
//!
//! The table is the authoritative local view of the group. Slot 0 always
//! holds the owning node's entry and is never evicted or replaced by
//! merge logic; every other slot is gossip-derived and subject to the
//! staleness policy.

use crate::node::{MemberEntry, NodeId};
use crate::protocol::WireEntry;
use tracing::{debug, trace};

/// The result of merging one gossiped entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Entry was our own key, or stale, and was discarded
    Ignored,
    /// Known member refreshed with a newer heartbeat
    Refreshed,
    /// Previously unknown member appended
    Added,
    /// Table was full: the least-recently-refreshed member made room
    Replaced {
        /// Member that was evicted to free the slot
        evicted: NodeId,
    },
}

/// Bounded, ordered membership table with the owner pinned at slot 0.
#[derive(Debug, Clone)]
pub struct MemberTable {
    entries: Vec<MemberEntry>,
    capacity: usize,
}

impl MemberTable {
    /// Create a table seeded with the owner's entry at slot 0.
    ///
    /// `capacity` bounds the total entry count, owner included.
    pub fn new(owner: NodeId, capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.push(MemberEntry::new(owner, 0, 0));
        Self { entries, capacity }
    }

    /// The owning node's identity
    pub fn owner(&self) -> NodeId {
        self.entries[0].node
    }

    /// The owner's slot-0 entry
    pub fn self_entry(&self) -> &MemberEntry {
        &self.entries[0]
    }

    /// Total entries, owner included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A table only ever shrinks down to the owner's entry
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of known peers (everything but slot 0)
    pub fn peer_count(&self) -> usize {
        self.entries.len() - 1
    }

    /// All entries in slot order
    pub fn entries(&self) -> &[MemberEntry] {
        &self.entries
    }

    /// Look up a member by key
    pub fn get(&self, node: NodeId) -> Option<&MemberEntry> {
        self.entries.iter().find(|e| e.node == node)
    }

    /// Refresh the owner's slot-0 entry at the start of a round
    pub fn refresh_owner(&mut self, local_clock: u64) {
        self.entries[0].heartbeat = local_clock;
        self.entries[0].last_refreshed = local_clock;
    }

    /// Merge one gossiped entry into the table.
    ///
    /// Gossip never overrides the owner's own entry. Unknown keys are
    /// appended, or replace the least-recently-refreshed peer when the
    /// table is full (ties broken by lowest slot index). Known keys are
    /// refreshed only by a strictly greater heartbeat, which makes stale
    /// and duplicate reports idempotent no-ops.
    pub fn merge_entry(&mut self, incoming: &WireEntry, local_clock: u64) -> MergeOutcome {
        if incoming.node == self.owner() {
            return MergeOutcome::Ignored;
        }

        if let Some(existing) = self.entries.iter_mut().find(|e| e.node == incoming.node) {
            if incoming.heartbeat > existing.heartbeat {
                existing.heartbeat = incoming.heartbeat;
                existing.last_refreshed = local_clock;
                return MergeOutcome::Refreshed;
            }
            trace!(member = %incoming.node, "discarding stale gossip entry");
            return MergeOutcome::Ignored;
        }

        if self.entries.len() < self.capacity {
            self.entries
                .push(MemberEntry::new(incoming.node, incoming.heartbeat, local_clock));
            debug!(member = %incoming.node, "member added");
            return MergeOutcome::Added;
        }

        // Table full: overwrite the staleness-oldest peer slot.
        let pos = self.oldest_peer_slot();
        let evicted = self.entries[pos].node;
        self.entries[pos] = MemberEntry::new(incoming.node, incoming.heartbeat, local_clock);
        debug!(member = %incoming.node, %evicted, "member replaced oldest entry");
        MergeOutcome::Replaced { evicted }
    }

    /// Index of the peer with the smallest `last_refreshed` (ties go to
    /// the lowest index). Only called when at least one peer exists.
    fn oldest_peer_slot(&self) -> usize {
        let mut pos = 1;
        let mut oldest = self.entries[1].last_refreshed;
        for (i, entry) in self.entries.iter().enumerate().skip(2) {
            if entry.last_refreshed < oldest {
                oldest = entry.last_refreshed;
                pos = i;
            }
        }
        pos
    }

    /// Drop every peer whose entry has gone `remove_after` rounds without
    /// a refresh. Returns the forgotten members.
    pub fn expire(&mut self, local_clock: u64, remove_after: u64) -> Vec<NodeId> {
        let mut removed = Vec::new();
        let mut i = 1;
        while i < self.entries.len() {
            if self.entries[i].is_expired(local_clock, remove_after) {
                removed.push(self.entries.remove(i).node);
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Peers currently inside the suspicion window
    pub fn suspected(&self, local_clock: u64, fail_after: u64) -> Vec<NodeId> {
        self.entries
            .iter()
            .skip(1)
            .filter(|e| e.is_suspected(local_clock, fail_after))
            .map(|e| e.node)
            .collect()
    }

    /// Snapshot for outbound piggybacking.
    ///
    /// Suspected entries are omitted so a failure rumor stops spreading
    /// once the local node classifies the peer as failed.
    pub fn gossip_entries(&self, local_clock: u64, fail_after: u64) -> Vec<WireEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_suspected(local_clock, fail_after))
            .map(|e| WireEntry {
                node: e.node,
                heartbeat: e.heartbeat,
            })
            .collect()
    }

    /// Select the peer to probe this round.
    ///
    /// Round-robin over peer slots starting at
    /// `(clock + offset) mod peer_count + 1`, skipping suspected entries.
    /// Returns `None` when there are no peers or every peer is suspected.
    pub fn probe_target(&self, local_clock: u64, fail_after: u64) -> Option<NodeId> {
        let peers = self.peer_count();
        if peers == 0 {
            return None;
        }
        for offset in 0..peers {
            let pos = ((local_clock as usize).wrapping_add(offset) % peers) + 1;
            if !self.entries[pos].is_suspected(local_clock, fail_after) {
                return Some(self.entries[pos].node);
            }
        }
        None
    }
}
