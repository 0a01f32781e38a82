#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
mod error;
pub mod proto;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod test_harness;
pub mod transport;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types most callers need at the crate root.
pub use crate::core::{
    CoherencyInfo, CoherencyRecord, DataEvent, Limits, NodeKey, OwnerInfo, PeerIdx, Timestamp,
};
pub use engine::{CoherencyEngine, CoherencyError};
pub use proto::{CoherencyMessage, MessageType};
pub use server::{CoherencyServer, ServerHandle};
pub use store::{MemoryStore, SlotStore, StoreError};
pub use transport::{TcpTransport, Transport, TransportError};
