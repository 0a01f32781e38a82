//! Coherency message schemas and fixed-layout wire codec.
//!
//! Five message kinds, each tagged with one byte. Body fields are `u32`s in
//! network byte order (big-endian); the owner index travels as a single raw
//! `i8` byte. `Data` carries the opaque serialized slot after the fixed
//! 8-byte key prefix; its length is implicit in the body length.

use bytes::Bytes;
use thiserror::Error;

use crate::core::{NodeKey, PeerIdx, Timestamp};

/// `nid` + `tree`, present in every body.
pub const KEY_PREFIX_LEN: usize = 8;
/// `nid` + `tree` + `timestamp` + owner byte.
pub const OWNERSHIP_BODY_LEN: usize = 13;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoherencyMessage {
    /// Pull the whole slot from the owner.
    RequestData { node: NodeKey },
    /// Claim ownership of a node.
    Ownership {
        node: NodeKey,
        timestamp: Timestamp,
        owner: PeerIdx,
    },
    /// Non-owner declares warm interest to the new owner.
    WarmAck { node: NodeKey },
    /// Push the serialized slot.
    Data { node: NodeKey, payload: Bytes },
    /// Invalidate the receiver's copy.
    Dirty { node: NodeKey },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    RequestData = 1,
    Ownership = 2,
    WarmAck = 3,
    Data = 4,
    Dirty = 5,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::RequestData => "REQUEST_DATA",
            MessageType::Ownership => "OWNERSHIP",
            MessageType::WarmAck => "OWNERSHIP_WARM_ACK",
            MessageType::Data => "DATA",
            MessageType::Dirty => "DIRTY",
        }
    }

    pub fn parse(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(MessageType::RequestData),
            2 => Some(MessageType::Ownership),
            3 => Some(MessageType::WarmAck),
            4 => Some(MessageType::Data),
            5 => Some(MessageType::Dirty),
            _ => None,
        }
    }
}

impl CoherencyMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            CoherencyMessage::RequestData { .. } => MessageType::RequestData,
            CoherencyMessage::Ownership { .. } => MessageType::Ownership,
            CoherencyMessage::WarmAck { .. } => MessageType::WarmAck,
            CoherencyMessage::Data { .. } => MessageType::Data,
            CoherencyMessage::Dirty { .. } => MessageType::Dirty,
        }
    }

    pub fn node(&self) -> NodeKey {
        match self {
            CoherencyMessage::RequestData { node }
            | CoherencyMessage::Ownership { node, .. }
            | CoherencyMessage::WarmAck { node }
            | CoherencyMessage::Data { node, .. }
            | CoherencyMessage::Dirty { node } => *node,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("{kind} body length invalid: expected {expected}, got {got}")]
    BodyLengthInvalid {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{kind} body too short: need at least {min} bytes, got {got}")]
    BodyTooShort {
        kind: &'static str,
        min: usize,
        got: usize,
    },
    #[error("framed body too short to carry type and sender: {got} bytes")]
    TruncatedEnvelope { got: usize },
}

/// Encode a message body (everything after the type tag).
pub fn encode_body(message: &CoherencyMessage) -> Vec<u8> {
    match message {
        CoherencyMessage::RequestData { node }
        | CoherencyMessage::WarmAck { node }
        | CoherencyMessage::Dirty { node } => key_prefix(*node).to_vec(),
        CoherencyMessage::Ownership {
            node,
            timestamp,
            owner,
        } => {
            let mut body = Vec::with_capacity(OWNERSHIP_BODY_LEN);
            body.extend_from_slice(&key_prefix(*node));
            body.extend_from_slice(&timestamp.get().to_be_bytes());
            body.push(owner.to_wire_byte());
            body
        }
        CoherencyMessage::Data { node, payload } => {
            let mut body = Vec::with_capacity(KEY_PREFIX_LEN + payload.len());
            body.extend_from_slice(&key_prefix(*node));
            body.extend_from_slice(payload);
            body
        }
    }
}

/// Decode a message body for a known type tag.
pub fn decode_body(message_type: MessageType, body: &[u8]) -> Result<CoherencyMessage, ProtoError> {
    let kind = message_type.as_str();
    match message_type {
        MessageType::RequestData => Ok(CoherencyMessage::RequestData {
            node: decode_exact_key(kind, body)?,
        }),
        MessageType::WarmAck => Ok(CoherencyMessage::WarmAck {
            node: decode_exact_key(kind, body)?,
        }),
        MessageType::Dirty => Ok(CoherencyMessage::Dirty {
            node: decode_exact_key(kind, body)?,
        }),
        MessageType::Ownership => {
            if body.len() != OWNERSHIP_BODY_LEN {
                return Err(ProtoError::BodyLengthInvalid {
                    kind,
                    expected: OWNERSHIP_BODY_LEN,
                    got: body.len(),
                });
            }
            let node = decode_key(body);
            let timestamp = Timestamp::new(u32::from_be_bytes(
                body[8..12].try_into().expect("slice length checked"),
            ));
            let owner = PeerIdx::from_wire_byte(body[12]);
            Ok(CoherencyMessage::Ownership {
                node,
                timestamp,
                owner,
            })
        }
        MessageType::Data => {
            if body.len() < KEY_PREFIX_LEN {
                return Err(ProtoError::BodyTooShort {
                    kind,
                    min: KEY_PREFIX_LEN,
                    got: body.len(),
                });
            }
            Ok(CoherencyMessage::Data {
                node: decode_key(body),
                payload: Bytes::copy_from_slice(&body[KEY_PREFIX_LEN..]),
            })
        }
    }
}

fn key_prefix(node: NodeKey) -> [u8; KEY_PREFIX_LEN] {
    let mut prefix = [0u8; KEY_PREFIX_LEN];
    prefix[..4].copy_from_slice(&(node.nid as u32).to_be_bytes());
    prefix[4..].copy_from_slice(&(node.tree as u32).to_be_bytes());
    prefix
}

fn decode_key(body: &[u8]) -> NodeKey {
    let nid = u32::from_be_bytes(body[..4].try_into().expect("slice length checked")) as i32;
    let tree = u32::from_be_bytes(body[4..8].try_into().expect("slice length checked")) as i32;
    NodeKey::new(tree, nid)
}

fn decode_exact_key(kind: &'static str, body: &[u8]) -> Result<NodeKey, ProtoError> {
    if body.len() != KEY_PREFIX_LEN {
        return Err(ProtoError::BodyLengthInvalid {
            kind,
            expected: KEY_PREFIX_LEN,
            got: body.len(),
        });
    }
    Ok(decode_key(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeKey {
        NodeKey::new(0, 7)
    }

    #[test]
    fn request_data_is_eight_bytes_nid_first() {
        let body = encode_body(&CoherencyMessage::RequestData { node: node() });
        assert_eq!(body, [0, 0, 0, 7, 0, 0, 0, 0]);
        let decoded = decode_body(MessageType::RequestData, &body).unwrap();
        assert_eq!(decoded, CoherencyMessage::RequestData { node: node() });
    }

    #[test]
    fn ownership_layout_is_thirteen_bytes() {
        let message = CoherencyMessage::Ownership {
            node: NodeKey::new(3, 7),
            timestamp: Timestamp::new(6),
            owner: PeerIdx::new(1),
        };
        let body = encode_body(&message);
        assert_eq!(body.len(), OWNERSHIP_BODY_LEN);
        assert_eq!(&body[..4], &[0, 0, 0, 7], "nid big-endian");
        assert_eq!(&body[4..8], &[0, 0, 0, 3], "tree big-endian");
        assert_eq!(&body[8..12], &[0, 0, 0, 6], "timestamp big-endian");
        assert_eq!(body[12], 1);
        assert_eq!(decode_body(MessageType::Ownership, &body).unwrap(), message);
    }

    #[test]
    fn no_owner_sentinel_survives_the_wire() {
        let message = CoherencyMessage::Ownership {
            node: node(),
            timestamp: Timestamp::new(1),
            owner: PeerIdx::NONE,
        };
        let body = encode_body(&message);
        assert_eq!(body[12], 0xff);
        let CoherencyMessage::Ownership { owner, .. } =
            decode_body(MessageType::Ownership, &body).unwrap()
        else {
            panic!("wrong kind");
        };
        assert!(owner.is_none());
    }

    #[test]
    fn data_payload_length_is_implicit() {
        let message = CoherencyMessage::Data {
            node: node(),
            payload: Bytes::from_static(&[0xde, 0xad]),
        };
        let body = encode_body(&message);
        assert_eq!(body.len(), KEY_PREFIX_LEN + 2);
        let decoded = decode_body(MessageType::Data, &body).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn empty_data_payload_is_valid() {
        let message = CoherencyMessage::Data {
            node: node(),
            payload: Bytes::new(),
        };
        let body = encode_body(&message);
        assert_eq!(decode_body(MessageType::Data, &body).unwrap(), message);
    }

    #[test]
    fn unknown_type_tag_does_not_parse() {
        assert_eq!(MessageType::parse(0), None);
        assert_eq!(MessageType::parse(6), None);
        for tag in 1..=5u8 {
            assert_eq!(MessageType::parse(tag).map(MessageType::as_u8), Some(tag));
        }
    }

    #[test]
    fn short_bodies_are_rejected() {
        let err = decode_body(MessageType::RequestData, &[0; 7]).unwrap_err();
        assert!(matches!(err, ProtoError::BodyLengthInvalid { got: 7, .. }));

        let err = decode_body(MessageType::Ownership, &[0; 12]).unwrap_err();
        assert!(matches!(
            err,
            ProtoError::BodyLengthInvalid {
                expected: OWNERSHIP_BODY_LEN,
                got: 12,
                ..
            }
        ));

        let err = decode_body(MessageType::Data, &[0; 5]).unwrap_err();
        assert!(matches!(err, ProtoError::BodyTooShort { got: 5, .. }));
    }

    #[test]
    fn trailing_bytes_on_fixed_bodies_are_rejected() {
        let err = decode_body(MessageType::Dirty, &[0; 9]).unwrap_err();
        assert!(matches!(err, ProtoError::BodyLengthInvalid { got: 9, .. }));
    }

    #[test]
    fn negative_key_fields_round_trip() {
        let node = NodeKey::new(-2, -40);
        let body = encode_body(&CoherencyMessage::Dirty { node });
        let decoded = decode_body(MessageType::Dirty, &body).unwrap();
        assert_eq!(decoded, CoherencyMessage::Dirty { node });
    }
}
