//! The application-facing node.
//!
//! An [`RpcNode`] owns the registry, the socket pool and the correlation
//! engine of one process. It listens for peers, dials peers, and issues
//! calls through [`RpcCall`] and [`BroadcastCall`].
//!
//! All state is single-threaded: nodes must be built and driven inside a
//! `tokio::task::LocalSet`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpcmesh::{Handlers, PeerIdentity, RpcNode, ConnectOptions, args};
//! use rpcmesh_core::TokioProviders;
//!
//! let handlers = Handlers::new().route_typed("math", "add", |(a, b): (i64, i64)| async move {
//!     Ok::<_, rpcmesh::HandlerError>(a + b)
//! });
//! let node = RpcNode::builder(PeerIdentity::new("calc-1", "calc"))
//!     .handlers(handlers)
//!     .build(TokioProviders::new());
//! node.listen(7000, None).await?;
//! node.connect(ConnectOptions::new("10.0.0.2", 7000));
//!
//! let sum = node.rpc("calc-2").call("math", "add", args![1, 2]).await;
//! ```

pub(crate) mod core;

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use rpcmesh_core::{NetworkProvider, Providers, TaskProvider, TcpListenerTrait};

use self::core::NodeCore;
pub use self::core::PeerEvent;
use crate::config::RpcConfig;
use crate::error::{CloseReason, NodeError, RpcError};
use crate::identity::PeerIdentity;
use crate::logger::{Logger, TracingLogger};
use crate::peer::ConnectionPhase;
use crate::peer::acceptor::accept_loop;
use crate::peer::initiator::{Dial, run_initiator};
use crate::rpc::pending::{BroadcastDone, Resolver};
use crate::rpc::{Args, BroadcastResults, Handlers, Reply};
use crate::wire::{DEFAULT_TOKEN, FrameType};

/// Builder for [`RpcNode`].
pub struct RpcNodeBuilder {
    identity: PeerIdentity,
    config: RpcConfig,
    handlers: Handlers,
    logger: Rc<dyn Logger>,
}

impl RpcNodeBuilder {
    /// Start from the default configuration, no handlers and [`TracingLogger`].
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            config: RpcConfig::default(),
            handlers: Handlers::new(),
            logger: Rc::new(TracingLogger),
        }
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes served to remote callers and to self-calls.
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Sink for lifecycle log lines. Defaults to [`TracingLogger`].
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Rc::new(logger);
        self
    }

    /// Create the node and start its clock and timeout sweeper.
    ///
    /// Must be called inside a `LocalSet`.
    pub fn build<P: Providers>(self, providers: P) -> RpcNode<P> {
        let core = Rc::new(NodeCore::new(
            providers,
            self.config,
            self.logger,
            self.identity,
            self.handlers,
        ));
        core.start_timers();
        RpcNode { core }
    }
}

/// Where [`RpcNode::connect`] dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Token presented at registration; the default token when `None`.
    pub token: Option<String>,
}

impl ConnectOptions {
    /// Dial `host:port` with the default token.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            token: None,
        }
    }

    /// Present `token` instead of the default one.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Handle to one outbound connection and its reconnect loop.
#[derive(Debug, Clone)]
pub struct ConnectHandle {
    addr: String,
    stop: CancellationToken,
    phase: Rc<Cell<ConnectionPhase>>,
}

impl ConnectHandle {
    /// Remote address being dialed.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Current phase of the connection.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase.get()
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.stop.cancel();
    }

    /// Whether [`close`](Self::close) was called or the node shut down.
    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// One process in the mesh.
///
/// Dropping the node shuts it down.
pub struct RpcNode<P: Providers> {
    core: Rc<NodeCore<P>>,
}

impl<P: Providers> std::fmt::Debug for RpcNode<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcNode")
            .field("identity", &self.core.identity)
            .field("known", &self.core.registry.borrow().len())
            .field("connected", &self.core.pool.borrow().len())
            .field("pending", &self.core.rpc.borrow().pending.len())
            .finish()
    }
}

impl RpcNode<rpcmesh_core::TokioProviders> {
    /// Start building a node with the given identity.
    pub fn builder(identity: PeerIdentity) -> RpcNodeBuilder {
        RpcNodeBuilder::new(identity)
    }
}

impl<P: Providers> RpcNode<P> {
    /// This node's identity.
    pub fn identity(&self) -> &PeerIdentity {
        &self.core.identity
    }

    /// The configuration the node runs with.
    pub fn config(&self) -> &RpcConfig {
        &self.core.config
    }

    /// Accept peers on `port`. Peers must present `token`, or the default
    /// token when `None`. Returns the bound local address.
    pub async fn listen(&self, port: u16, token: Option<&str>) -> Result<String, NodeError> {
        if self.core.listening.get() {
            return Err(NodeError::AlreadyListening);
        }
        let listener = self
            .core
            .providers
            .network()
            .bind(&format!("0.0.0.0:{port}"))
            .await?;
        let local_addr = listener.local_addr()?;
        self.core.listening.set(true);

        let token: Rc<str> = Rc::from(token.unwrap_or(DEFAULT_TOKEN));
        self.core.logger.info(&format!(
            "{} listening on {}",
            self.core.identity.id, local_addr
        ));
        self.core.providers.task().spawn_task(
            "rpcmesh_accept",
            accept_loop(self.core.clone(), listener, token),
        );
        Ok(local_addr)
    }

    /// Dial a peer and keep the connection up until closed.
    ///
    /// Returns immediately; calls to the remote peer queue until it
    /// registers.
    pub fn connect(&self, options: ConnectOptions) -> ConnectHandle {
        let addr = options.addr();
        let stop = self.core.shutdown.child_token();
        let phase = Rc::new(Cell::new(ConnectionPhase::Connecting));
        let dial = Dial {
            addr: addr.clone(),
            token: options.token.unwrap_or_else(|| DEFAULT_TOKEN.to_string()),
        };
        self.core.providers.task().spawn_task(
            "rpcmesh_initiator",
            run_initiator(self.core.clone(), dial, stop.clone(), phase.clone()),
        );
        ConnectHandle { addr, stop, phase }
    }

    /// Calls addressed to the peer `target`, which may be this node.
    pub fn rpc(&self, target: impl Into<String>) -> RpcCall<P> {
        RpcCall {
            core: self.core.clone(),
            target: target.into(),
        }
    }

    /// Calls addressed to every reachable peer with `role`, this node
    /// included when its role matches.
    pub fn broadcast(&self, role: impl Into<String>) -> BroadcastCall<P> {
        BroadcastCall {
            core: self.core.clone(),
            role: role.into(),
        }
    }

    /// Close the live connection to `id`. Initiators closed this way do not
    /// reconnect. Returns false when `id` has no live connection.
    pub fn close_connection(&self, id: &str, reason: Option<&str>) -> bool {
        let link = self.core.pool.borrow().get(id);
        match link {
            Some(link) => {
                let reason = reason.unwrap_or("closed by user").to_string();
                link.close(CloseReason::ClosedByUser(reason));
                true
            }
            None => false,
        }
    }

    /// Registered peers with `role`, this node included when it matches.
    pub fn peers_by_role(&self, role: &str) -> Vec<Rc<PeerIdentity>> {
        self.core.registry.borrow().by_role(role)
    }

    /// Registered peer `id`, this node included.
    pub fn peer_by_id(&self, id: &str) -> Option<Rc<PeerIdentity>> {
        self.core.registry.borrow().get(id)
    }

    /// Whether `id` has a live, registered connection.
    pub fn is_connected(&self, id: &str) -> bool {
        self.core.pool.borrow().contains(id)
    }

    /// Stream of peer added/removed events from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PeerEvent> {
        self.core.subscribe()
    }

    /// Close every connection, stop listening and stop reconnecting.
    /// Pending and queued calls fail with [`RpcError::Timeout`] on the next
    /// tick, and later calls fail the same way.
    pub fn shutdown(&self) {
        if !self.core.shutdown.is_cancelled() {
            self.core
                .logger
                .info(&format!("{} shutting down", self.core.identity.id));
            self.core.shutdown.cancel();
        }
    }
}

impl<P: Providers> Drop for RpcNode<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Calls to one peer. Created by [`RpcNode::rpc`].
pub struct RpcCall<P: Providers> {
    core: Rc<NodeCore<P>>,
    target: String,
}

impl<P: Providers> RpcCall<P> {
    /// Call `route.method` and wait for the reply.
    ///
    /// The request is sent (or queued) before this returns; the future only
    /// waits. Resolves to `None` on timeout or any failure.
    pub fn call(
        &self,
        route: &str,
        method: &str,
        args: Args,
    ) -> impl Future<Output = Option<Reply>> + use<P> {
        let (tx, rx) = oneshot::channel();
        self.core.send_request(
            &self.target,
            FrameType::RpcMsgAwait,
            route,
            method,
            args,
            Some(Resolver::Await(tx)),
        );
        async move { rx.await.ok().flatten() }
    }

    /// Call `route.method` and hand the outcome to `callback`, exactly once.
    pub fn call_with<F>(&self, route: &str, method: &str, args: Args, callback: F)
    where
        F: FnOnce(Result<Reply, RpcError>) + 'static,
    {
        self.core.send_request(
            &self.target,
            FrameType::RpcMsg,
            route,
            method,
            args,
            Some(Resolver::Callback(Box::new(callback))),
        );
    }

    /// Fire-and-forget: no request id, no reply.
    pub fn notify(&self, route: &str, method: &str, args: Args) {
        self.core
            .send_request(&self.target, FrameType::RpcMsg, route, method, args, None);
    }
}

/// Calls fanned out to a role. Created by [`RpcNode::broadcast`].
pub struct BroadcastCall<P: Providers> {
    core: Rc<NodeCore<P>>,
    role: String,
}

impl<P: Providers> BroadcastCall<P> {
    /// Call every target and wait for all outcomes, keyed by peer id.
    pub fn call(
        &self,
        route: &str,
        method: &str,
        args: Args,
    ) -> impl Future<Output = BroadcastResults> + use<P> {
        let (tx, rx) = oneshot::channel();
        self.core.broadcast(
            &self.role,
            FrameType::RpcMsgAwait,
            route,
            method,
            args,
            Some(BroadcastDone::Await(tx)),
        );
        async move { rx.await.unwrap_or_default() }
    }

    /// Call every target; `callback` runs once with all outcomes.
    pub fn call_with<F>(&self, route: &str, method: &str, args: Args, callback: F)
    where
        F: FnOnce(BroadcastResults) + 'static,
    {
        self.core.broadcast(
            &self.role,
            FrameType::RpcMsg,
            route,
            method,
            args,
            Some(BroadcastDone::Callback(Box::new(callback))),
        );
    }

    /// Notify every target.
    pub fn notify(&self, route: &str, method: &str, args: Args) {
        self.core
            .broadcast(&self.role, FrameType::RpcMsg, route, method, args, None);
    }
}
