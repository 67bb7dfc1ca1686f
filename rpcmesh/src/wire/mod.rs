//! Wire format.
//!
//! Every frame is `[length:4 BE][type:1][body:length-1]`:
//!
//! | type | name          | body                                         |
//! |------|---------------|----------------------------------------------|
//! | 1    | `register`    | JSON [`RegisterRequest`] or [`RegisterReply`] |
//! | 2    | `heartbeat`   | empty                                        |
//! | 3    | `closeClient` | UTF-8 reason                                 |
//! | 4    | `rpcMsg`      | RPC body, see [`message`]                    |
//! | 5    | `rpcMsgAwait` | RPC body, see [`message`]                    |

pub mod decoder;
pub mod message;

pub use decoder::{FrameDecoder, Frames, FramingError, LENGTH_PREFIX_SIZE, encode_length_prefixed};
pub use message::{MAX_HEADER_LEN, RpcHeader, RpcMessage};

use serde::{Deserialize, Serialize};

use crate::identity::PeerIdentity;

/// Default maximum frame length once registered (10 MiB).
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Maximum frame length accepted before registration.
pub const MAX_FRAME_LEN_UNREGISTERED: usize = 1024;

/// Token used when `listen`/`connect` are not given one.
pub const DEFAULT_TOKEN: &str = "rpcmesh_token";

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// A frame with no type byte.
    #[error("empty frame")]
    Empty,

    /// Type byte outside the known set.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// A known frame type that is not valid where it was received.
    #[error("unexpected frame type {0:?}")]
    UnexpectedFrame(FrameType),

    /// RPC body shorter than its declared sections.
    #[error("truncated rpc body: need {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required by the header fields.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// A JSON section failed to parse.
    #[error("invalid JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::Json(err.to_string())
    }
}

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Registration request or reply.
    Register = 1,
    /// Heartbeat and its reply.
    Heartbeat = 2,
    /// Close notice with a reason.
    CloseClient = 3,
    /// RPC message, callback or notify style.
    RpcMsg = 4,
    /// RPC message, await style.
    RpcMsgAwait = 5,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameType::Register),
            2 => Ok(FrameType::Heartbeat),
            3 => Ok(FrameType::CloseClient),
            4 => Ok(FrameType::RpcMsg),
            5 => Ok(FrameType::RpcMsgAwait),
            other => Err(WireError::UnknownFrameType(other)),
        }
    }
}

/// A decoded frame: type plus body (length prefix already stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub kind: FrameType,
    /// Everything after the type byte.
    pub body: Vec<u8>,
}

impl Frame {
    /// Split a frame produced by [`FrameDecoder`] into type and body.
    pub fn parse(mut bytes: Vec<u8>) -> Result<Self, WireError> {
        let first = *bytes.first().ok_or(WireError::Empty)?;
        let kind = FrameType::try_from(first)?;
        bytes.remove(0);
        Ok(Frame { kind, body: bytes })
    }
}

/// Encode a complete frame including its length prefix.
pub fn encode_frame(kind: FrameType, body: &[u8]) -> Vec<u8> {
    let len = 1 + body.len();
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + len);
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.push(kind as u8);
    out.extend_from_slice(body);
    out
}

/// Heartbeat frame, identical in both directions.
pub fn heartbeat_frame() -> Vec<u8> {
    encode_frame(FrameType::Heartbeat, &[])
}

/// `closeClient` frame carrying a human-readable reason.
pub fn close_frame(reason: &str) -> Vec<u8> {
    encode_frame(FrameType::CloseClient, reason.as_bytes())
}

/// Body of the initiator's register frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// The initiator's identity.
    pub peer_identity: PeerIdentity,
    /// Shared secret checked by the acceptor.
    #[serde(default)]
    pub token: String,
}

/// Body of the acceptor's register reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReply {
    /// The acceptor's identity.
    pub peer_identity: PeerIdentity,
    /// Interval the initiator must heartbeat at.
    pub heartbeat_interval_ms: u64,
}

/// Encode a register frame around a JSON body.
pub fn register_frame<T: Serialize>(body: &T) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(body)?;
    Ok(encode_frame(FrameType::Register, &json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(FrameType::CloseClient, b"bye");
        assert_eq!(frame, vec![0, 0, 0, 4, 3, b'b', b'y', b'e']);
    }

    #[test]
    fn test_heartbeat_frame_has_empty_body() {
        assert_eq!(heartbeat_frame(), vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_parse_splits_type_and_body() {
        let mut decoder = FrameDecoder::new(64);
        let bytes = close_frame("maintenance");
        let raw = decoder
            .decode(&bytes)
            .next()
            .expect("one frame")
            .expect("valid frame");

        let frame = Frame::parse(raw).expect("parse");
        assert_eq!(frame.kind, FrameType::CloseClient);
        assert_eq!(frame.body, b"maintenance");
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert_eq!(
            Frame::parse(vec![9, 1, 2]),
            Err(WireError::UnknownFrameType(9))
        );
        assert_eq!(Frame::parse(Vec::new()), Err(WireError::Empty));
    }

    #[test]
    fn test_register_request_json_shape() {
        let request = RegisterRequest {
            peer_identity: PeerIdentity::new("gate1", "gate"),
            token: "secret".to_string(),
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "peerIdentity": { "id": "gate1", "role": "gate" },
                "token": "secret"
            })
        );
    }

    #[test]
    fn test_register_reply_roundtrip_with_attributes() {
        let reply = RegisterReply {
            peer_identity: PeerIdentity::new("gate1", "gate").with_attribute("zone", "eu"),
            heartbeat_interval_ms: 60_000,
        };
        let frame = register_frame(&reply).expect("encode");
        let parsed = Frame::parse(frame[LENGTH_PREFIX_SIZE..].to_vec()).expect("parse");
        assert_eq!(parsed.kind, FrameType::Register);

        let decoded: RegisterReply = serde_json::from_slice(&parsed.body).expect("decode");
        assert_eq!(decoded, reply);
        assert_eq!(decoded.peer_identity.attributes["zone"], "eu");
    }
}
