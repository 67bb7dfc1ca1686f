//! RPC frame body.
//!
//! ```text
//! [header_len:1][header JSON:header_len][payload JSON][trailing binary]
//! ```
//!
//! The header says what the frame is:
//!
//! - `route` + `method`, no `requestId`: notification
//! - `route` + `method` + `requestId`: call expecting a reply
//! - `requestId` only: reply to an earlier call
//!
//! Requests carry the JSON argument array as payload, replies carry the
//! result value. `trailingBinaryLen` marks raw bytes appended after the
//! JSON so large buffers skip JSON escaping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FrameType, WireError, encode_frame};
use crate::error::RpcError;

/// Largest header that fits the one-byte length prefix.
pub const MAX_HEADER_LEN: usize = u8::MAX as usize;

/// RPC header block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcHeader {
    /// Handler group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Method inside the handler group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Correlation id; absent on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u32>,
    /// Length of the raw bytes after the JSON payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_binary_len: Option<usize>,
}

impl RpcHeader {
    /// Header of a call or notification.
    pub fn request(route: &str, method: &str, request_id: Option<u32>) -> Self {
        Self {
            route: Some(route.to_string()),
            method: Some(method.to_string()),
            request_id,
            trailing_binary_len: None,
        }
    }

    /// Header of a reply.
    pub fn reply(request_id: u32) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::default()
        }
    }
}

/// Decoded RPC frame body.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    /// Header block.
    pub header: RpcHeader,
    /// Argument array (requests) or result value (replies).
    pub payload: Value,
    /// Trailing raw bytes, if the header announced any.
    pub binary: Option<Vec<u8>>,
}

impl RpcMessage {
    /// Encode a complete `rpcMsg`/`rpcMsgAwait` frame, length prefix included.
    pub fn encode(
        kind: FrameType,
        mut header: RpcHeader,
        payload: &Value,
        binary: Option<&[u8]>,
    ) -> Result<Vec<u8>, RpcError> {
        header.trailing_binary_len = binary.map(<[u8]>::len);
        let header_json = serde_json::to_vec(&header)?;
        if header_json.len() > MAX_HEADER_LEN {
            return Err(RpcError::HeaderTooLong {
                len: header_json.len(),
            });
        }
        let payload_json = serde_json::to_vec(payload)?;

        let binary = binary.unwrap_or_default();
        let mut body =
            Vec::with_capacity(1 + header_json.len() + payload_json.len() + binary.len());
        body.push(header_json.len() as u8);
        body.extend_from_slice(&header_json);
        body.extend_from_slice(&payload_json);
        body.extend_from_slice(binary);
        Ok(encode_frame(kind, &body))
    }

    /// Decode the body of an `rpcMsg`/`rpcMsgAwait` frame.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let (&header_len, rest) = body.split_first().ok_or(WireError::Truncated {
            needed: 1,
            have: 0,
        })?;
        let header_len = header_len as usize;
        if rest.len() < header_len {
            return Err(WireError::Truncated {
                needed: 1 + header_len,
                have: body.len(),
            });
        }
        let (header_json, rest) = rest.split_at(header_len);
        let header: RpcHeader = serde_json::from_slice(header_json)?;

        let binary_len = header.trailing_binary_len.unwrap_or(0);
        if rest.len() < binary_len {
            return Err(WireError::Truncated {
                needed: 1 + header_len + binary_len,
                have: body.len(),
            });
        }
        let (payload_json, binary) = rest.split_at(rest.len() - binary_len);
        let payload = if payload_json.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(payload_json)?
        };

        let binary = header.trailing_binary_len.map(|_| binary.to_vec());
        Ok(RpcMessage {
            header,
            payload,
            binary,
        })
    }
}
