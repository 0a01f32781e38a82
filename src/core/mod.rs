//! Core coherency types.
//!
//! Module hierarchy follows type dependency order:
//! - identity: PeerIdx, NodeKey, Timestamp
//! - record: per-node coherency record and snapshots
//! - event: one-shot data events for stalled readers
//! - limits: operational limits

pub mod event;
pub mod identity;
pub mod limits;
pub mod record;

pub use event::{DataEvent, EventWaiter};
pub use identity::{NodeKey, PeerIdx, Timestamp, claim_wins};
pub use limits::Limits;
pub use record::{CoherencyInfo, CoherencyRecord, OwnerInfo};
