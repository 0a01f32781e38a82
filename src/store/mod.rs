//! Metadata store and serializer bridge.
//!
//! The protocol engine consumes the [`SlotStore`] capability set: coherency
//! record access, subscriber bookkeeping, opaque slot blob read/write, and
//! the per-node data event. Implementations own their own locking; every
//! method is an atomic read-modify-write from the engine's point of view.

mod memory;

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::core::{CoherencyInfo, DataEvent, NodeKey, OwnerInfo, PeerIdx, Timestamp};

pub use memory::MemoryStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no data slot for node {node}")]
    SlotMissing { node: NodeKey },
}

pub trait SlotStore: Send + Sync {
    /// Snapshot for `check_read` and the inbound handlers.
    fn coherency_info(&self, node: NodeKey) -> CoherencyInfo;

    /// Snapshot for `check_write`: ownership plus both subscriber sets.
    fn owner_info(&self, node: NodeKey) -> OwnerInfo;

    /// Install an accepted remote ownership claim. Clears `readers`/`warms`
    /// when this peer loses ownership; leaves the warm and dirty flags alone.
    fn set_owner(&self, node: NodeKey, owner: PeerIdx, timestamp: Timestamp);

    /// This peer becomes owner: fresh timestamp, empty subscriber sets,
    /// local warm flag preserved, dirty flag cleared.
    fn take_ownership(&self, node: NodeKey, timestamp: Timestamp);

    fn set_dirty(&self, node: NodeKey, dirty: bool);

    /// Local warm subscription flag, set by accessors that want every update
    /// pushed rather than refetching lazily.
    fn set_warm(&self, node: NodeKey, warm: bool);

    /// Idempotent set inserts, meaningful only while owner.
    fn add_reader(&self, node: NodeKey, peer: PeerIdx);
    fn add_warm(&self, node: NodeKey, peer: PeerIdx);

    /// Size of the serialized slot; 0 when the slot has never been written.
    fn serialized_size(&self, node: NodeKey) -> usize;

    /// The whole serialized slot.
    fn read_serialized(&self, node: NodeKey) -> Result<Bytes, StoreError>;

    /// Replace the whole serialized slot.
    fn write_serialized(&self, node: NodeKey, payload: Bytes);

    /// The node's data event, created lazily and alive for the rest of the
    /// process.
    fn data_event(&self, node: NodeKey) -> Arc<DataEvent>;
}
