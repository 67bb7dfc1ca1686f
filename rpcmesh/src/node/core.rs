//! Shared state of one node.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rpcmesh_core::{Providers, TaskProvider, TimeProvider};

use crate::config::{CLOCK_REFRESH, RpcConfig, SWEEP_INTERVAL};
use crate::identity::PeerIdentity;
use crate::logger::Logger;
use crate::peer::Link;
use crate::registry::{Registry, SocketPool};
use crate::rpc::clock::CoarseClock;
use crate::rpc::{Handlers, RpcState};

/// Peer lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A peer completed registration and is reachable.
    Added(Rc<PeerIdentity>),
    /// A registered peer's connection died.
    Removed(Rc<PeerIdentity>),
}

/// Everything connection tasks and the facade share.
pub(crate) struct NodeCore<P: Providers> {
    pub(crate) providers: P,
    pub(crate) config: RpcConfig,
    pub(crate) logger: Rc<dyn Logger>,
    pub(crate) identity: Rc<PeerIdentity>,
    pub(crate) handlers: Handlers,
    pub(crate) registry: RefCell<Registry>,
    pub(crate) pool: RefCell<SocketPool>,
    pub(crate) rpc: RefCell<RpcState>,
    pub(crate) clock: CoarseClock,
    pub(crate) shutdown: CancellationToken,
    subscribers: RefCell<Vec<mpsc::UnboundedSender<PeerEvent>>>,
    pub(crate) listening: Cell<bool>,
    next_link_id: Cell<u64>,
}

impl<P: Providers> NodeCore<P> {
    pub(crate) fn new(
        providers: P,
        config: RpcConfig,
        logger: Rc<dyn Logger>,
        identity: PeerIdentity,
        handlers: Handlers,
    ) -> Self {
        let identity = Rc::new(identity);
        let mut registry = Registry::default();
        // The local process is a known peer: role lookups and broadcasts see it.
        registry.add(identity.clone());
        let clock = CoarseClock::new(providers.time().now(), config.timeout());

        Self {
            providers,
            config,
            logger,
            identity,
            handlers,
            registry: RefCell::new(registry),
            pool: RefCell::new(SocketPool::default()),
            rpc: RefCell::new(RpcState::default()),
            clock,
            shutdown: CancellationToken::new(),
            subscribers: RefCell::new(Vec::new()),
            listening: Cell::new(false),
            next_link_id: Cell::new(0),
        }
    }

    /// Spawn the coarse clock refresher and the timeout sweeper.
    pub(crate) fn start_timers(self: &Rc<Self>) {
        let core = self.clone();
        self.providers.task().spawn_task("rpcmesh_clock", async move {
            let time = core.providers.time().clone();
            loop {
                tokio::select! {
                    _ = core.shutdown.cancelled() => break,
                    _ = time.sleep(CLOCK_REFRESH) => core.clock.refresh(time.now()),
                }
            }
        });

        let core = self.clone();
        self.providers.task().spawn_task("rpcmesh_sweeper", async move {
            let time = core.providers.time().clone();
            loop {
                tokio::select! {
                    _ = core.shutdown.cancelled() => {
                        core.fail_all();
                        break;
                    }
                    _ = time.sleep(SWEEP_INTERVAL) => core.sweep(),
                }
            }
        });
    }

    pub(crate) fn next_link_id(&self) -> u64 {
        let id = self.next_link_id.get() + 1;
        self.next_link_id.set(id);
        id
    }

    /// Whether `id` is already taken by the local node or a registered peer.
    pub(crate) fn is_registered(&self, id: &str) -> bool {
        self.registry.borrow().contains(id)
    }

    /// Registration succeeded: index the peer, publish its link, send what
    /// was queued for it and notify subscribers.
    pub(crate) fn activate(&self, identity: PeerIdentity, link: &Link) -> Rc<PeerIdentity> {
        let peer = Rc::new(identity);
        self.registry.borrow_mut().add(peer.clone());
        self.pool.borrow_mut().add(&peer.id, link.clone());

        let queued = self.rpc.borrow_mut().queues.take(&peer.id);
        if !queued.is_empty() {
            tracing::debug!(peer = %peer.id, count = queued.len(), "draining outbound queue");
        }
        for entry in queued {
            if let Some(pending) = entry.pending {
                self.rpc.borrow_mut().pending.insert(pending);
            }
            link.send(entry.frame);
        }

        self.logger.info(&format!(
            "peer {} ({}) registered from {}",
            peer.id,
            peer.role,
            link.remote_address()
        ));
        self.emit(PeerEvent::Added(peer.clone()));
        peer
    }

    /// The connection behind `link_id` died. Detaches the peer only if the
    /// pool still holds that very link.
    pub(crate) fn deactivate(&self, peer: &Rc<PeerIdentity>, link_id: u64) -> bool {
        if !self.pool.borrow_mut().remove(&peer.id, link_id) {
            return false;
        }
        self.registry.borrow_mut().remove(peer);
        self.emit(PeerEvent::Removed(peer.clone()));
        true
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<PeerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    fn emit(&self, event: PeerEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
