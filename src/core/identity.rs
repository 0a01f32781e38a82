//! Identity atoms: peer indices, node keys, ownership timestamps.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Peer index - small stable integer identifying one cache process.
///
/// Fits in a signed byte on the wire. `-1` is the reserved "no owner"
/// sentinel; any other negative value is treated the same way.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdx(i8);

impl PeerIdx {
    /// The "no owner" sentinel.
    pub const NONE: PeerIdx = PeerIdx(-1);

    pub fn new(raw: i8) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i8 {
        self.0
    }

    /// True for the no-owner sentinel.
    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    /// The single raw byte this index occupies on the wire.
    pub fn to_wire_byte(self) -> u8 {
        self.0 as u8
    }

    pub fn from_wire_byte(raw: u8) -> Self {
        Self(raw as i8)
    }
}

impl Default for PeerIdx {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Debug for PeerIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdx({})", self.0)
    }
}

impl fmt::Display for PeerIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coherence key: `(tree, nid)` selects one node within one namespace.
///
/// Opaque to the protocol; used only as a map key and a wire field pair.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, Debug,
)]
pub struct NodeKey {
    pub tree: i32,
    pub nid: i32,
}

impl NodeKey {
    pub fn new(tree: i32, nid: i32) -> Self {
        Self { tree, nid }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tree, self.nid)
    }
}

/// Monotone logical clock ordering ownership claims.
///
/// Non-decreasing at any single peer. Equal-timestamp claims tie-break on
/// the larger peer index (see [`claim_wins`]).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, Debug,
)]
#[serde(transparent)]
pub struct Timestamp(u32);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The next claim value. Saturates rather than wrap so the clock stays
    /// non-decreasing even at the (unreachable in practice) u32 ceiling.
    pub fn next(self) -> Timestamp {
        Timestamp(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ownership conflict resolution: a claim beats the current holder iff its
/// timestamp is newer, or equal with a larger claimant index.
pub fn claim_wins(
    timestamp: Timestamp,
    claimant: PeerIdx,
    current_timestamp: Timestamp,
    current_owner: PeerIdx,
) -> bool {
    timestamp > current_timestamp || (timestamp == current_timestamp && claimant > current_owner)
}
