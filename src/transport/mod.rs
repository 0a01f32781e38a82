//! Transport context: peer table, communication gate, framed unicast send.
//!
//! An explicit context object threaded through the engine at construction;
//! no process-wide singletons. Tests substitute the in-memory transport from
//! the test harness.

pub mod frame;
mod tcp;

use thiserror::Error;

use crate::core::PeerIdx;
use crate::proto::{self, CoherencyMessage, MessageType, ProtoError};

pub use frame::{FrameError, FrameReader, FrameWriter, encode_frame};
pub use tcp::TcpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peer index: {peer}")]
    UnknownPeer { peer: PeerIdx },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Message-oriented peer channel the engine sends through.
///
/// Sender identity is a channel concern: every framed body starts with the
/// type tag and the sending peer's index, so receivers can hand both to the
/// dispatch loop without the protocol bodies carrying them.
pub trait Transport: Send + Sync {
    /// The peer index designated "this process".
    fn this_peer(&self) -> PeerIdx;

    /// Every other known peer, ascending.
    fn others(&self) -> Vec<PeerIdx>;

    /// Process-wide communication gate; accessor hooks short-circuit when
    /// disabled.
    fn is_enabled(&self) -> bool;

    /// Addressed unicast send. Failures are reported, never retried here.
    fn send(&self, to: PeerIdx, message: &CoherencyMessage) -> Result<(), TransportError>;
}

/// Assemble the framed body: `[type][sender][message body]`.
pub fn encode_wire_body(sender: PeerIdx, message: &CoherencyMessage) -> Vec<u8> {
    let body = proto::encode_body(message);
    let mut framed = Vec::with_capacity(2 + body.len());
    framed.push(message.message_type().as_u8());
    framed.push(sender.to_wire_byte());
    framed.extend_from_slice(&body);
    framed
}

/// Split a framed body back into sender identity and message.
pub fn decode_wire_body(framed: &[u8]) -> Result<(PeerIdx, CoherencyMessage), ProtoError> {
    if framed.len() < 2 {
        return Err(ProtoError::TruncatedEnvelope { got: framed.len() });
    }
    let message_type =
        MessageType::parse(framed[0]).ok_or(ProtoError::UnknownMessageType(framed[0]))?;
    let sender = PeerIdx::from_wire_byte(framed[1]);
    let message = proto::decode_body(message_type, &framed[2..])?;
    Ok((sender, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NodeKey, Timestamp};

    #[test]
    fn wire_body_round_trips_sender_and_message() {
        let message = CoherencyMessage::Ownership {
            node: NodeKey::new(0, 7),
            timestamp: Timestamp::new(6),
            owner: PeerIdx::new(1),
        };
        let framed = encode_wire_body(PeerIdx::new(1), &message);
        assert_eq!(framed[0], MessageType::Ownership.as_u8());
        assert_eq!(framed[1], 1);

        let (sender, decoded) = decode_wire_body(&framed).unwrap();
        assert_eq!(sender, PeerIdx::new(1));
        assert_eq!(decoded, message);
    }

    #[test]
    fn unknown_tag_is_a_decode_error() {
        let err = decode_wire_body(&[9, 0, 0, 0, 0, 7, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, ProtoError::UnknownMessageType(9));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        assert_eq!(
            decode_wire_body(&[4]).unwrap_err(),
            ProtoError::TruncatedEnvelope { got: 1 }
        );
        assert_eq!(
            decode_wire_body(&[]).unwrap_err(),
            ProtoError::TruncatedEnvelope { got: 0 }
        );
    }
}
