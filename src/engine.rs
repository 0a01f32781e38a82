//! Coherency protocol engine.
//!
//! Single-writer-multi-reader coherency for per-node data slots. The engine
//! is stateless: all mutable state lives in the store, and no record value is
//! cached across a transport send. Inbound handlers run on the server's
//! dispatch task; `check_read` and `check_write` run on arbitrary accessor
//! threads.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::core::{Limits, NodeKey, PeerIdx, Timestamp, claim_wins};
use crate::proto::CoherencyMessage;
use crate::store::{SlotStore, StoreError};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum CoherencyError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("stalled read timed out for node {node}")]
    ReadStallTimeout { node: NodeKey },
}

pub struct CoherencyEngine<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    limits: Limits,
}

impl<S: SlotStore, T: Transport> CoherencyEngine<S, T> {
    pub fn new(store: Arc<S>, transport: Arc<T>, limits: Limits) -> Self {
        Self {
            store,
            transport,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Inbound dispatch. Runs to completion; never panics the dispatch task.
    /// Handler failures are logged, per-message state stays consistent.
    pub fn handle_message(&self, sender: PeerIdx, message: CoherencyMessage) {
        match message {
            CoherencyMessage::RequestData { node } => self.handle_request_data(node, sender),
            CoherencyMessage::Ownership {
                node,
                timestamp,
                owner,
            } => self.handle_ownership(node, timestamp, owner, sender),
            CoherencyMessage::WarmAck { node } => self.handle_warm_ack(node, sender),
            CoherencyMessage::Data { node, payload } => self.handle_data(node, payload),
            CoherencyMessage::Dirty { node } => self.handle_dirty(node, sender),
        }
    }

    /// Pull request: answer unconditionally with our best-known value, owner
    /// or not, and remember the puller as a reader.
    fn handle_request_data(&self, node: NodeKey, sender: PeerIdx) {
        trace!(%node, %sender, "data request");
        let payload = match self.store.read_serialized(node) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%node, %sender, %err, "cannot answer data request");
                return;
            }
        };
        if !self.payload_within_limit(node, payload.len()) {
            return;
        }
        self.store.add_reader(node, sender);
        self.send_or_log(sender, &CoherencyMessage::Data { node, payload });
    }

    /// Ownership claim: accept iff the claim beats the current holder, then
    /// either subscribe warm (ack to the new owner) or go dirty.
    fn handle_ownership(&self, node: NodeKey, timestamp: Timestamp, owner: PeerIdx, sender: PeerIdx) {
        let info = self.store.coherency_info(node);
        if !claim_wins(timestamp, owner, info.timestamp, info.owner) {
            debug!(
                %node, %owner, %timestamp,
                current_owner = %info.owner, current_timestamp = %info.timestamp,
                "dropping stale ownership claim"
            );
            return;
        }

        trace!(%node, %owner, %timestamp, "ownership accepted");
        self.store.set_owner(node, owner, timestamp);

        if info.is_warm {
            // Re-subscribe with the new owner so it keeps pushing updates.
            self.send_or_log(sender, &CoherencyMessage::WarmAck { node });
        } else {
            self.store.set_dirty(node, true);
        }
    }

    /// Warm subscription from a peer: only meaningful while we are owner;
    /// a stale ack is silently ignored. Registration is answered with an
    /// immediate data push.
    fn handle_warm_ack(&self, node: NodeKey, sender: PeerIdx) {
        let info = self.store.coherency_info(node);
        if !info.is_owner {
            trace!(%node, %sender, "ignoring warm ack while not owner");
            return;
        }
        self.store.add_warm(node, sender);
        match self.store.read_serialized(node) {
            Ok(payload) if self.payload_within_limit(node, payload.len()) => {
                self.send_or_log(sender, &CoherencyMessage::Data { node, payload });
            }
            Ok(_) => {}
            Err(err) => warn!(%node, %sender, %err, "cannot push data to warm subscriber"),
        }
    }

    /// Fresh payload from the owner: install it, wake any stalled reader,
    /// mark clean. An oversized payload is dropped without touching the
    /// slot; the replica stays dirty and refetches later.
    fn handle_data(&self, node: NodeKey, payload: bytes::Bytes) {
        trace!(%node, len = payload.len(), "data received");
        if !self.payload_within_limit(node, payload.len()) {
            return;
        }
        self.store.write_serialized(node, payload);
        self.store.data_event(node).signal();
        self.store.set_dirty(node, false);
    }

    fn handle_dirty(&self, node: NodeKey, sender: PeerIdx) {
        trace!(%node, %sender, "marked dirty by owner");
        self.store.set_dirty(node, true);
    }

    /// Call before reading the local replica. Blocks until the owner's copy
    /// arrives when the local one is known stale.
    pub fn check_read(&self, node: NodeKey) -> Result<(), CoherencyError> {
        if !self.transport.is_enabled() {
            return Ok(());
        }
        let info = self.store.coherency_info(node);
        if info.is_owner || info.owner.is_none() || info.is_warm || !info.is_dirty {
            return Ok(());
        }

        // Register the waiter before the request goes out so a reply racing
        // the wait cannot be missed.
        let event = self.store.data_event(node);
        let waiter = event.waiter();
        debug!(%node, owner = %info.owner, "stalling read on dirty replica");
        self.transport
            .send(info.owner, &CoherencyMessage::RequestData { node })?;

        match self.limits.read_stall_timeout_ms {
            None => {
                waiter.wait();
                Ok(())
            }
            Some(timeout_ms) => {
                if waiter.wait_deadline(Duration::from_millis(timeout_ms)) {
                    Ok(())
                } else {
                    Err(CoherencyError::ReadStallTimeout { node })
                }
            }
        }
    }

    /// Call after writing the local replica. A non-owner takes ownership and
    /// broadcasts the claim; an owner fans the update out to its subscribers,
    /// warm pushes before reader invalidations.
    pub fn check_write(&self, node: NodeKey) -> Result<(), CoherencyError> {
        if !self.transport.is_enabled() {
            return Ok(());
        }
        let info = self.store.owner_info(node);

        if !info.is_owner {
            let timestamp = info.timestamp.next();
            self.store.take_ownership(node, timestamp);
            let claim = CoherencyMessage::Ownership {
                node,
                timestamp,
                owner: self.transport.this_peer(),
            };
            debug!(%node, %timestamp, "taking ownership");
            for peer in self.transport.others() {
                self.send_or_log(peer, &claim);
            }
            return Ok(());
        }

        if info.warms.is_empty() && info.readers.is_empty() {
            return Ok(());
        }

        if !info.warms.is_empty() {
            let payload = self.store.read_serialized(node)?;
            if self.payload_within_limit(node, payload.len()) {
                let data = CoherencyMessage::Data { node, payload };
                for peer in &info.warms {
                    self.send_or_log(*peer, &data);
                }
            }
        }
        for peer in &info.readers {
            self.send_or_log(*peer, &CoherencyMessage::Dirty { node });
        }
        Ok(())
    }

    /// Payload cap for every `Data` path, send and receive alike. A breach
    /// is handled like a failed transport send: logged, the operation
    /// abandoned, and the affected replicas stay dirty until later traffic.
    fn payload_within_limit(&self, node: NodeKey, len: usize) -> bool {
        if len > self.limits.max_payload_bytes {
            warn!(
                %node,
                len,
                max = self.limits.max_payload_bytes,
                "payload exceeds max_payload_bytes"
            );
            return false;
        }
        true
    }

    /// Transport failures are logged and the send abandoned; later traffic
    /// restores coherency.
    fn send_or_log(&self, to: PeerIdx, message: &CoherencyMessage) {
        if let Err(err) = self.transport.send(to, message) {
            warn!(
                %to,
                kind = message.message_type().as_str(),
                node = %message.node(),
                %err,
                "send failed"
            );
        }
    }
}
