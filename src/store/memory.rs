//! In-memory slot store.
//!
//! Default [`SlotStore`] backed by process memory. One mutex serializes
//! every mutation; node state is created lazily on first touch and never
//! evicted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::core::{CoherencyInfo, CoherencyRecord, DataEvent, NodeKey, OwnerInfo, PeerIdx, Timestamp};

use super::{SlotStore, StoreError};

#[derive(Debug, Default)]
struct NodeState {
    record: CoherencyRecord,
    slot: Option<Bytes>,
    event: Arc<DataEvent>,
}

#[derive(Debug)]
pub struct MemoryStore {
    this_peer: PeerIdx,
    nodes: Mutex<BTreeMap<NodeKey, NodeState>>,
}

impl MemoryStore {
    pub fn new(this_peer: PeerIdx) -> Self {
        Self {
            this_peer,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn this_peer(&self) -> PeerIdx {
        self.this_peer
    }

    fn with_node<R>(&self, node: NodeKey, f: impl FnOnce(&mut NodeState) -> R) -> R {
        let mut nodes = self.nodes.lock().expect("slot store lock poisoned");
        f(nodes.entry(node).or_default())
    }
}

impl SlotStore for MemoryStore {
    fn coherency_info(&self, node: NodeKey) -> CoherencyInfo {
        self.with_node(node, |state| state.record.info(self.this_peer))
    }

    fn owner_info(&self, node: NodeKey) -> OwnerInfo {
        self.with_node(node, |state| state.record.owner_info(self.this_peer))
    }

    fn set_owner(&self, node: NodeKey, owner: PeerIdx, timestamp: Timestamp) {
        self.with_node(node, |state| {
            state.record.install_owner(self.this_peer, owner, timestamp);
        });
    }

    fn take_ownership(&self, node: NodeKey, timestamp: Timestamp) {
        self.with_node(node, |state| {
            state.record.take_ownership(self.this_peer, timestamp);
        });
    }

    fn set_dirty(&self, node: NodeKey, dirty: bool) {
        self.with_node(node, |state| state.record.is_dirty = dirty);
    }

    fn set_warm(&self, node: NodeKey, warm: bool) {
        self.with_node(node, |state| state.record.is_warm = warm);
    }

    fn add_reader(&self, node: NodeKey, peer: PeerIdx) {
        self.with_node(node, |state| {
            state.record.readers.insert(peer);
        });
    }

    fn add_warm(&self, node: NodeKey, peer: PeerIdx) {
        self.with_node(node, |state| {
            state.record.warms.insert(peer);
        });
    }

    fn serialized_size(&self, node: NodeKey) -> usize {
        self.with_node(node, |state| {
            state.slot.as_ref().map(Bytes::len).unwrap_or(0)
        })
    }

    fn read_serialized(&self, node: NodeKey) -> Result<Bytes, StoreError> {
        self.with_node(node, |state| {
            state
                .slot
                .clone()
                .ok_or(StoreError::SlotMissing { node })
        })
    }

    fn write_serialized(&self, node: NodeKey, payload: Bytes) {
        self.with_node(node, |state| state.slot = Some(payload));
    }

    fn data_event(&self, node: NodeKey) -> Arc<DataEvent> {
        self.with_node(node, |state| Arc::clone(&state.event))
    }
}
