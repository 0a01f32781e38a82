//! Deterministic in-memory cluster for protocol tests.
//!
//! [`ChannelTransport`] routes messages into per-peer mailboxes instead of
//! sockets; delivery order per sender-receiver pair is preserved, and tests
//! control when (and in which interleaving) mailboxes drain. This is the
//! fake transport counterpart of [`TcpTransport`](crate::TcpTransport),
//! implementing the same capability set.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::{Limits, PeerIdx};
use crate::engine::CoherencyEngine;
use crate::proto::CoherencyMessage;
use crate::store::MemoryStore;
use crate::transport::{Transport, TransportError};

type Mailbox = VecDeque<(PeerIdx, CoherencyMessage)>;

#[derive(Debug, Default)]
pub struct MailboxHub {
    mailboxes: Mutex<BTreeMap<PeerIdx, Mailbox>>,
}

impl MailboxHub {
    fn register(&self, peer: PeerIdx) {
        self.mailboxes
            .lock()
            .expect("mailbox hub poisoned")
            .entry(peer)
            .or_default();
    }

    fn push(
        &self,
        to: PeerIdx,
        from: PeerIdx,
        message: CoherencyMessage,
    ) -> Result<(), TransportError> {
        let mut mailboxes = self.mailboxes.lock().expect("mailbox hub poisoned");
        match mailboxes.get_mut(&to) {
            Some(mailbox) => {
                mailbox.push_back((from, message));
                Ok(())
            }
            None => Err(TransportError::UnknownPeer { peer: to }),
        }
    }

    fn pop(&self, peer: PeerIdx) -> Option<(PeerIdx, CoherencyMessage)> {
        self.mailboxes
            .lock()
            .expect("mailbox hub poisoned")
            .get_mut(&peer)?
            .pop_front()
    }

    fn drain(&self, peer: PeerIdx) -> Vec<(PeerIdx, CoherencyMessage)> {
        self.mailboxes
            .lock()
            .expect("mailbox hub poisoned")
            .get_mut(&peer)
            .map(|mailbox| mailbox.drain(..).collect())
            .unwrap_or_default()
    }

    fn peers(&self) -> Vec<PeerIdx> {
        self.mailboxes
            .lock()
            .expect("mailbox hub poisoned")
            .keys()
            .copied()
            .collect()
    }
}

/// In-memory [`Transport`] backed by the hub's mailboxes.
pub struct ChannelTransport {
    this_peer: PeerIdx,
    enabled: Arc<AtomicBool>,
    hub: Arc<MailboxHub>,
}

impl Transport for ChannelTransport {
    fn this_peer(&self) -> PeerIdx {
        self.this_peer
    }

    fn others(&self) -> Vec<PeerIdx> {
        self.hub
            .peers()
            .into_iter()
            .filter(|peer| *peer != self.this_peer)
            .collect()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn send(&self, to: PeerIdx, message: &CoherencyMessage) -> Result<(), TransportError> {
        self.hub.push(to, self.this_peer, message.clone())
    }
}

pub struct Peer {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<CoherencyEngine<MemoryStore, ChannelTransport>>,
    enabled: Arc<AtomicBool>,
}

/// A cluster of in-process peers sharing one mailbox hub.
pub struct Cluster {
    peers: BTreeMap<PeerIdx, Peer>,
    hub: Arc<MailboxHub>,
}

impl Cluster {
    pub fn new(indices: &[i8]) -> Self {
        // A finite stall deadline keeps a broken test from hanging forever.
        let limits = Limits {
            read_stall_timeout_ms: Some(5_000),
            ..Limits::default()
        };
        Self::with_limits(indices, limits)
    }

    pub fn with_limits(indices: &[i8], limits: Limits) -> Self {
        let hub = Arc::new(MailboxHub::default());
        for &idx in indices {
            hub.register(PeerIdx::new(idx));
        }

        let mut peers = BTreeMap::new();
        for &idx in indices {
            let peer_idx = PeerIdx::new(idx);
            let enabled = Arc::new(AtomicBool::new(true));
            let store = Arc::new(MemoryStore::new(peer_idx));
            let transport = Arc::new(ChannelTransport {
                this_peer: peer_idx,
                enabled: Arc::clone(&enabled),
                hub: Arc::clone(&hub),
            });
            let engine = Arc::new(CoherencyEngine::new(
                Arc::clone(&store),
                transport,
                limits.clone(),
            ));
            peers.insert(
                peer_idx,
                Peer {
                    store,
                    engine,
                    enabled,
                },
            );
        }

        Self { peers, hub }
    }

    pub fn engine(&self, idx: i8) -> Arc<CoherencyEngine<MemoryStore, ChannelTransport>> {
        Arc::clone(&self.peers[&PeerIdx::new(idx)].engine)
    }

    pub fn store(&self, idx: i8) -> Arc<MemoryStore> {
        Arc::clone(&self.peers[&PeerIdx::new(idx)].store)
    }

    /// Flip one peer's communication gate.
    pub fn set_enabled(&self, idx: i8, enabled: bool) {
        self.peers[&PeerIdx::new(idx)]
            .enabled
            .store(enabled, Ordering::Relaxed);
    }

    /// Deliver one queued message at `idx`, if any. Handlers run on the
    /// calling thread, exactly as the server's dispatch task would run them.
    pub fn step(&self, idx: i8) -> bool {
        let peer_idx = PeerIdx::new(idx);
        match self.hub.pop(peer_idx) {
            Some((sender, message)) => {
                self.peers[&peer_idx].engine.handle_message(sender, message);
                true
            }
            None => false,
        }
    }

    /// Deliver queued messages round-robin until every mailbox is idle.
    /// Handlers may enqueue further messages; those are delivered too.
    pub fn pump(&self) {
        loop {
            let mut delivered = false;
            let indices: Vec<i8> = self.peers.keys().map(|peer| peer.get()).collect();
            for idx in indices {
                while self.step(idx) {
                    delivered = true;
                }
            }
            if !delivered {
                break;
            }
        }
    }

    /// Drain `idx`'s mailbox without delivering, for reordering tests.
    pub fn take_mailbox(&self, idx: i8) -> Vec<(PeerIdx, CoherencyMessage)> {
        self.hub.drain(PeerIdx::new(idx))
    }

    /// Queue a message at `to` as if `from` had sent it.
    pub fn inject(&self, to: i8, from: PeerIdx, message: CoherencyMessage) {
        self.hub
            .push(PeerIdx::new(to), from, message)
            .expect("inject target must be a cluster member");
    }
}
