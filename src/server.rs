//! Coherency server: framed TCP accept loop and single dispatch task.
//!
//! Per-connection reader threads decode frames and forward `(sender,
//! message)` pairs into a channel; one dispatcher thread drains it and runs
//! every handler to completion before the next is dispatched. A misbehaving
//! message is logged and dropped, never fatal to the server.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use thiserror::Error;
use tracing::{trace, warn};

use crate::core::{Limits, PeerIdx};
use crate::engine::CoherencyEngine;
use crate::proto::CoherencyMessage;
use crate::store::SlotStore;
use crate::transport::{FrameReader, Transport, decode_wire_body};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("listen address did not resolve: {addr}")]
    AddrUnresolved { addr: String },
}

/// A bound but not yet running server. Binding first makes the local port
/// known before any peer traffic is produced.
pub struct CoherencyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    limits: Limits,
}

pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    accept_join: JoinHandle<()>,
    dispatch_join: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and dispatching, then wait for both loops to exit.
    /// Connection reader threads unwind on their own once the dispatcher's
    /// channel closes.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.accept_join.join();
        let _ = self.dispatch_join.join();
    }

    /// Run until the accept loop exits (it does not on its own; this is the
    /// daemon's foreground parking spot).
    pub fn join(self) {
        let _ = self.accept_join.join();
        let _ = self.dispatch_join.join();
    }
}

impl CoherencyServer {
    pub fn bind(addr: &str, limits: Limits) -> Result<Self, ServerError> {
        let resolved = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ServerError::AddrUnresolved {
                addr: addr.to_string(),
            })?;
        let listener = TcpListener::bind(resolved)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            limits,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register the engine as the handler for all message types and start
    /// the receive loop.
    pub fn start<S, T>(self, engine: Arc<CoherencyEngine<S, T>>) -> Result<ServerHandle, ServerError>
    where
        S: SlotStore + 'static,
        T: Transport + 'static,
    {
        self.listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (inbound_tx, inbound_rx) = unbounded::<(PeerIdx, CoherencyMessage)>();

        let dispatch_shutdown = Arc::clone(&shutdown);
        let dispatch_join =
            thread::spawn(move || run_dispatch_loop(inbound_rx, engine, dispatch_shutdown));

        let accept_shutdown = Arc::clone(&shutdown);
        let limits = self.limits;
        let listener = self.listener;
        let accept_join =
            thread::spawn(move || run_accept_loop(listener, inbound_tx, limits, accept_shutdown));

        Ok(ServerHandle {
            shutdown,
            accept_join,
            dispatch_join,
            local_addr: self.local_addr,
        })
    }
}

fn run_dispatch_loop<S, T>(
    inbound_rx: Receiver<(PeerIdx, CoherencyMessage)>,
    engine: Arc<CoherencyEngine<S, T>>,
    shutdown: Arc<AtomicBool>,
) where
    S: SlotStore,
    T: Transport,
{
    loop {
        match inbound_rx.recv_timeout(Duration::from_millis(50)) {
            Ok((sender, message)) => engine.handle_message(sender, message),
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_accept_loop(
    listener: TcpListener,
    inbound_tx: Sender<(PeerIdx, CoherencyMessage)>,
    limits: Limits,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, remote)) => {
                trace!(%remote, "coherency connection accepted");
                let tx = inbound_tx.clone();
                let max_frame_bytes = limits.max_frame_bytes;
                thread::spawn(move || run_connection_reader(stream, tx, max_frame_bytes));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                warn!(%err, "coherency accept error");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn run_connection_reader(
    stream: TcpStream,
    inbound_tx: Sender<(PeerIdx, CoherencyMessage)>,
    max_frame_bytes: usize,
) {
    if let Err(err) = stream.set_nodelay(true) {
        warn!(%err, "failed to set nodelay on inbound connection");
    }
    let peer_addr = stream.peer_addr().ok();
    let mut reader = FrameReader::new(stream, max_frame_bytes);

    loop {
        match reader.read_next() {
            Ok(Some(framed)) => match decode_wire_body(&framed) {
                Ok((sender, message)) => {
                    if inbound_tx.send((sender, message)).is_err() {
                        // Dispatcher is gone; the server is shutting down.
                        break;
                    }
                }
                // Malformed or unknown message: logged and dropped, the
                // connection stays up (frame boundaries are intact).
                Err(err) => warn!(remote = ?peer_addr, %err, "dropping undecodable message"),
            },
            Ok(None) => break,
            Err(err) => {
                warn!(remote = ?peer_addr, %err, "coherency connection failed");
                break;
            }
        }
    }
}
