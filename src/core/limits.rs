//! Operational limits.

use serde::{Deserialize, Serialize};

/// Safety limits for the coherency channel and accessor hooks.
///
/// Values are explicit about their units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest frame the channel will emit or accept.
    pub max_frame_bytes: usize,
    /// Largest serialized node payload a `Data` message may carry.
    pub max_payload_bytes: usize,
    /// Dial timeout for outbound peer connections.
    pub connect_timeout_ms: u64,
    /// Deadline for a stalled `check_read`. `None` waits indefinitely.
    pub read_stall_timeout_ms: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
            max_payload_bytes: 8 * 1024 * 1024,
            connect_timeout_ms: 5_000,
            read_stall_timeout_ms: None,
        }
    }
}
