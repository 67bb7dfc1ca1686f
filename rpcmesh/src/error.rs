//! Error types for the rpcmesh layers.
//!
//! Connection-level errors ([`CloseReason`] and what it wraps) never reach
//! the application as values: they are logged once when the connection
//! closes. Applications only see [`RpcError`] from calls and
//! [`NodeError`] from `listen`.

use std::io;

use crate::wire::{FramingError, WireError};

/// Errors delivered to callers of remote procedures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// No route to the target and queuing is disabled.
    #[error("no such server: {target}")]
    NoSuchServer {
        /// The target peer id.
        target: String,
    },

    /// No reply arrived before the deadline, or the queued call was dropped.
    #[error("rpc timeout")]
    Timeout,

    /// Arguments or result could not be serialized.
    #[error("encode failed: {message}")]
    Encode {
        /// Details about the serialization failure.
        message: String,
    },

    /// The RPC header does not fit in its one-byte length prefix.
    #[error("rpc header too long: {len} bytes (max 255)")]
    HeaderTooLong {
        /// Encoded header length.
        len: usize,
    },

    /// The encoded frame exceeds the configured maximum frame length.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Encoded frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A reply could not be decoded into the requested type.
    #[error("decode failed: {message}")]
    Decode {
        /// Details about the deserialization failure.
        message: String,
    },
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Encode {
            message: err.to_string(),
        }
    }
}

/// Errors raised by request handlers, or while routing to them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// No handler registered for the route.
    #[error("no handler for {route}.{method}")]
    NoRoute {
        /// Handler group.
        route: String,
        /// Method inside the group.
        method: String,
    },

    /// The argument array does not match the handler signature.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// The handler itself failed.
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Fatal errors during the register exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// No register frame within the registration window.
    #[error("register timeout")]
    Timeout,

    /// The first frame was not a register frame.
    #[error("illegal register: frame type {0}")]
    UnexpectedFrame(u8),

    /// The register payload is not valid JSON of the expected shape.
    #[error("register JSON parse error: {0}")]
    Malformed(String),

    /// Identity without id or role.
    #[error("register without peer id or role")]
    MissingIdentity,

    /// Token does not match the listener's token.
    #[error("illegal token")]
    InvalidToken,

    /// A peer with the same id is already registered.
    #[error("already has a same name peer: {id}")]
    DuplicatePeer {
        /// The duplicated peer id.
        id: String,
    },
}

/// Why a connection left the Active phase (or never reached it).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseReason {
    /// The byte stream violated the framing rules.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The register exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// No heartbeat (acceptor) or heartbeat reply (initiator) in time.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// A frame type that is not allowed in the current phase.
    #[error("illegal data type: {0}")]
    ProtocolViolation(WireError),

    /// The remote sent a `closeClient` frame.
    #[error("closed by peer: {0}")]
    ClosedByPeer(String),

    /// Closed through the local API.
    #[error("closed by user: {0}")]
    ClosedByUser(String),

    /// The local node is shutting down.
    #[error("node shutdown")]
    Shutdown,

    /// The remote closed the stream.
    #[error("socket closed by remote")]
    Eof,

    /// Reading or connecting failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl CloseReason {
    /// Whether this close came from the local user (no reconnect).
    pub fn is_local(&self) -> bool {
        matches!(self, CloseReason::ClosedByUser(_) | CloseReason::Shutdown)
    }

    /// Reason string sent in a `closeClient` frame, when one is sent at all.
    ///
    /// Heartbeat timeouts, framing errors and dead sockets close silently.
    pub fn farewell(&self) -> Option<String> {
        match self {
            CloseReason::Handshake(err) => Some(err.to_string()),
            CloseReason::ProtocolViolation(_) => Some("illegal data type".to_string()),
            CloseReason::ClosedByUser(reason) => Some(reason.clone()),
            CloseReason::Shutdown => Some("node shutdown".to_string()),
            _ => None,
        }
    }
}

impl From<io::Error> for CloseReason {
    fn from(err: io::Error) -> Self {
        CloseReason::Io(err.to_string())
    }
}

/// Errors from facade operations that are not calls.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// `listen` was already called on this node.
    #[error("already listening")]
    AlreadyListening,

    /// Binding the listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_closes_do_not_reconnect() {
        assert!(CloseReason::ClosedByUser("bye".into()).is_local());
        assert!(CloseReason::Shutdown.is_local());
        assert!(!CloseReason::ClosedByPeer("bye".into()).is_local());
        assert!(!CloseReason::HeartbeatTimeout.is_local());
        assert!(!CloseReason::Handshake(HandshakeError::Timeout).is_local());
    }

    #[test]
    fn test_farewell_reasons() {
        assert_eq!(
            CloseReason::Handshake(HandshakeError::InvalidToken).farewell(),
            Some("illegal token".to_string())
        );
        assert_eq!(
            CloseReason::Handshake(HandshakeError::Timeout).farewell(),
            Some("register timeout".to_string())
        );
        assert_eq!(
            CloseReason::ClosedByUser("maintenance".into()).farewell(),
            Some("maintenance".to_string())
        );
        assert_eq!(CloseReason::HeartbeatTimeout.farewell(), None);
        assert_eq!(CloseReason::Eof.farewell(), None);
    }
}
