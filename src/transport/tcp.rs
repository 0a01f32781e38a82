//! TCP transport with cached outbound connections.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::core::{Limits, PeerIdx};
use crate::proto::CoherencyMessage;

use super::frame::encode_frame;
use super::{Transport, TransportError, encode_wire_body};

pub struct TcpTransport {
    this_peer: PeerIdx,
    peers: BTreeMap<PeerIdx, SocketAddr>,
    limits: Limits,
    enabled: AtomicBool,
    connections: Mutex<BTreeMap<PeerIdx, TcpStream>>,
}

impl TcpTransport {
    pub fn new(this_peer: PeerIdx, peers: BTreeMap<PeerIdx, SocketAddr>, limits: Limits) -> Self {
        Self {
            this_peer,
            peers,
            limits,
            enabled: AtomicBool::new(true),
            connections: Mutex::new(BTreeMap::new()),
        }
    }

    /// Flip the process-wide communication gate.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn peer_addr(&self, peer: PeerIdx) -> Option<SocketAddr> {
        self.peers.get(&peer).copied()
    }

    fn connect(&self, peer: PeerIdx) -> Result<TcpStream, TransportError> {
        let addr = self
            .peers
            .get(&peer)
            .ok_or(TransportError::UnknownPeer { peer })?;
        let stream =
            TcpStream::connect_timeout(addr, Duration::from_millis(self.limits.connect_timeout_ms))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn this_peer(&self) -> PeerIdx {
        self.this_peer
    }

    fn others(&self) -> Vec<PeerIdx> {
        self.peers
            .keys()
            .copied()
            .filter(|peer| *peer != self.this_peer)
            .collect()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn send(&self, to: PeerIdx, message: &CoherencyMessage) -> Result<(), TransportError> {
        let framed = encode_wire_body(self.this_peer, message);
        let frame = encode_frame(&framed, self.limits.max_frame_bytes)?;

        let mut connections = self.connections.lock().expect("connection cache poisoned");
        // Reuse the cached stream; a send error drops it so the next send
        // redials rather than writing into a dead socket.
        let mut stream = match connections.remove(&to) {
            Some(stream) => stream,
            None => self.connect(to)?,
        };

        use std::io::Write;
        match stream.write_all(&frame).and_then(|()| stream.flush()) {
            Ok(()) => {
                connections.insert(to, stream);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
