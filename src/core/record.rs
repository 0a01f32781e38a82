//! Per-node coherency record.
//!
//! One record exists per `(tree, nid)` the protocol has touched. The record
//! holds ownership, the warm/dirty flags, and the two subscriber sets the
//! owner maintains. Records are created lazily and never evicted.

use std::collections::BTreeSet;

use super::identity::{PeerIdx, Timestamp};

/// Mutable coherency state for one node at one peer.
///
/// Invariants maintained by the mutators:
/// - an owner's copy is authoritative, so taking ownership clears the dirty flag;
/// - `readers` and `warms` are meaningful only while owner, so losing
///   ownership clears both sets;
/// - the timestamp never decreases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoherencyRecord {
    pub owner: PeerIdx,
    pub timestamp: Timestamp,
    pub is_warm: bool,
    pub is_dirty: bool,
    /// Peers that pulled data from us while we were owner (non-warm pullers).
    pub readers: BTreeSet<PeerIdx>,
    /// Peers that declared warm interest to us while we were owner.
    pub warms: BTreeSet<PeerIdx>,
}

impl CoherencyRecord {
    pub fn is_owner(&self, this_peer: PeerIdx) -> bool {
        !self.owner.is_none() && self.owner == this_peer
    }

    /// Install an accepted remote ownership claim.
    ///
    /// Clears the subscriber sets when this peer is not the new owner; the
    /// warm and dirty flags are left for the caller to adjust.
    pub fn install_owner(&mut self, this_peer: PeerIdx, owner: PeerIdx, timestamp: Timestamp) {
        self.owner = owner;
        self.timestamp = timestamp;
        if owner != this_peer {
            self.readers.clear();
            self.warms.clear();
        }
    }

    /// This peer becomes owner with a fresh claim.
    ///
    /// Starts with empty subscriber sets; keeps the local warm subscription
    /// flag untouched. The owner's copy is authoritative, so the dirty flag
    /// is cleared.
    pub fn take_ownership(&mut self, this_peer: PeerIdx, timestamp: Timestamp) {
        self.owner = this_peer;
        self.timestamp = timestamp;
        self.is_dirty = false;
        self.readers.clear();
        self.warms.clear();
    }

    pub fn info(&self, this_peer: PeerIdx) -> CoherencyInfo {
        CoherencyInfo {
            is_owner: self.is_owner(this_peer),
            owner: self.owner,
            is_warm: self.is_warm,
            is_dirty: self.is_dirty,
            timestamp: self.timestamp,
        }
    }

    pub fn owner_info(&self, this_peer: PeerIdx) -> OwnerInfo {
        OwnerInfo {
            is_owner: self.is_owner(this_peer),
            owner: self.owner,
            is_warm: self.is_warm,
            timestamp: self.timestamp,
            warms: self.warms.iter().copied().collect(),
            readers: self.readers.iter().copied().collect(),
        }
    }
}

/// Snapshot consumed by `check_read` and the inbound handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoherencyInfo {
    pub is_owner: bool,
    pub owner: PeerIdx,
    pub is_warm: bool,
    pub is_dirty: bool,
    pub timestamp: Timestamp,
}

/// Snapshot consumed by `check_write`: ownership plus both subscriber sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo {
    pub is_owner: bool,
    pub owner: PeerIdx,
    pub is_warm: bool,
    pub timestamp: Timestamp,
    pub warms: Vec<PeerIdx>,
    pub readers: Vec<PeerIdx>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(raw: i8) -> PeerIdx {
        PeerIdx::new(raw)
    }

    #[test]
    fn fresh_record_has_no_owner() {
        let record = CoherencyRecord::default();
        assert_eq!(record.owner, PeerIdx::NONE);
        assert!(!record.is_owner(peer(0)));
        assert!(!record.is_dirty);
        assert!(!record.is_warm);
    }

    #[test]
    fn losing_ownership_clears_subscriber_sets() {
        let this_peer = peer(1);
        let mut record = CoherencyRecord::default();
        record.take_ownership(this_peer, Timestamp::new(1));
        record.readers.insert(peer(2));
        record.warms.insert(peer(3));

        record.install_owner(this_peer, peer(2), Timestamp::new(2));
        assert!(!record.is_owner(this_peer));
        assert!(record.readers.is_empty());
        assert!(record.warms.is_empty());
        assert_eq!(record.timestamp, Timestamp::new(2));
    }

    #[test]
    fn reclaiming_ownership_keeps_nothing_from_the_previous_reign() {
        let this_peer = peer(1);
        let mut record = CoherencyRecord::default();
        record.take_ownership(this_peer, Timestamp::new(1));
        record.readers.insert(peer(2));
        record.is_dirty = true;

        record.take_ownership(this_peer, Timestamp::new(3));
        assert!(record.is_owner(this_peer));
        assert!(record.readers.is_empty());
        assert!(record.warms.is_empty());
        assert!(!record.is_dirty, "an owner's copy is authoritative");
    }

    #[test]
    fn take_ownership_preserves_local_warm_flag() {
        let this_peer = peer(4);
        let mut record = CoherencyRecord {
            is_warm: true,
            ..CoherencyRecord::default()
        };
        record.take_ownership(this_peer, Timestamp::new(1));
        assert!(record.is_warm);
    }

    #[test]
    fn install_owner_for_self_keeps_subscriber_sets() {
        let this_peer = peer(1);
        let mut record = CoherencyRecord::default();
        record.take_ownership(this_peer, Timestamp::new(1));
        record.warms.insert(peer(3));

        // A claim naming ourselves (echoed back by a peer) must not wipe
        // the subscriber bookkeeping.
        record.install_owner(this_peer, this_peer, Timestamp::new(1));
        assert_eq!(record.warms.iter().copied().collect::<Vec<_>>(), [peer(3)]);
    }
}
