//! # rpcmesh
//!
//! Peer-to-peer RPC over raw TCP.
//!
//! Every process in the mesh is an [`RpcNode`] identified by a
//! [`PeerIdentity`] (unique id plus role). Nodes listen, dial each other,
//! register with a token, keep connections alive with heartbeats and
//! reconnect after failures. On top of that the node offers:
//! - **Calls**: `node.rpc(id).call(route, method, args)` with await,
//!   callback or fire-and-forget styles
//! - **Broadcast**: the same three styles fanned out to every peer of a role
//! - **Queuing**: calls to peers that are not connected yet wait in a
//!   bounded per-peer queue
//! - **Batching**: optional per-role send intervals coalescing writes
//!
//! Everything runs on one thread inside a `tokio::task::LocalSet`; I/O,
//! time and spawning go through the [`rpcmesh_core`] providers so the same
//! code runs over real TCP or an in-memory network.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub use rpcmesh_core::{
    MemoryNetworkProvider, MemoryProviders, NetworkProvider, Providers, TaskProvider,
    TcpListenerTrait, TimeProvider, TokioProviders,
};

// =============================================================================
// Modules
// =============================================================================

/// Node configuration.
pub mod config;

/// Error types.
pub mod error;

/// Peer identity.
pub mod identity;

/// Logging sink.
pub mod logger;

/// Application-facing node.
pub mod node;

/// Connection lifecycle.
pub mod peer;

/// Known peers and live connections.
mod registry;

/// Request correlation, handlers and queuing.
pub mod rpc;

/// Framed sockets.
mod socket;

/// Wire format.
pub mod wire;

#[doc(hidden)]
pub mod __private {
    pub use serde_json::json;
}

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{RpcConfig, SendInterval};
pub use error::{CloseReason, HandlerError, HandshakeError, NodeError, RpcError};
pub use identity::PeerIdentity;
pub use logger::{Logger, TracingLogger};
pub use node::{
    BroadcastCall, ConnectHandle, ConnectOptions, PeerEvent, RpcCall, RpcNode, RpcNodeBuilder,
};
pub use peer::ConnectionPhase;
pub use rpc::{Args, BroadcastResults, HandlerFuture, Handlers, Reply, Request};
pub use wire::{DEFAULT_TOKEN, FrameType, WireError};
