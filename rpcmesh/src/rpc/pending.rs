//! Pending-request table.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::handlers::Reply;
use crate::error::RpcError;

/// Per-peer outcome of a broadcast, keyed by peer id.
pub type BroadcastResults = BTreeMap<String, Result<Reply, RpcError>>;

/// Callback of a callback-style call.
pub type ReplyCallback = Box<dyn FnOnce(Result<Reply, RpcError>)>;

/// Callback of a callback-style broadcast.
pub type BroadcastCallback = Box<dyn FnOnce(BroadcastResults)>;

/// How a finished call reports back.
pub(crate) enum Resolver {
    Callback(ReplyCallback),
    /// Await style: `None` on timeout or failure.
    Await(oneshot::Sender<Option<Reply>>),
    Broadcast {
        aggregate: Rc<RefCell<BroadcastAggregate>>,
        peer: String,
    },
}

impl Resolver {
    /// Deliver the outcome. Must be called without any node borrow held,
    /// callbacks may issue new calls.
    pub(crate) fn resolve(self, result: Result<Reply, RpcError>) {
        match self {
            Resolver::Callback(callback) => callback(result),
            Resolver::Await(tx) => {
                let _ = tx.send(result.ok());
            }
            Resolver::Broadcast { aggregate, peer } => {
                let finished = aggregate.borrow_mut().record(peer, result);
                if let Some((done, results)) = finished {
                    done.deliver(results);
                }
            }
        }
    }
}

/// Where a broadcast delivers its aggregated results.
pub(crate) enum BroadcastDone {
    Callback(BroadcastCallback),
    Await(oneshot::Sender<BroadcastResults>),
}

impl BroadcastDone {
    pub(crate) fn deliver(self, results: BroadcastResults) {
        match self {
            BroadcastDone::Callback(callback) => callback(results),
            BroadcastDone::Await(tx) => {
                let _ = tx.send(results);
            }
        }
    }
}

/// Collects one outcome per targeted peer, then delivers them once.
pub(crate) struct BroadcastAggregate {
    remaining: usize,
    results: BroadcastResults,
    done: Option<BroadcastDone>,
}

impl BroadcastAggregate {
    pub(crate) fn new(expected: usize, done: BroadcastDone) -> Self {
        Self {
            remaining: expected,
            results: BTreeMap::new(),
            done: Some(done),
        }
    }

    /// Store one outcome; returns the sink and results once all are in.
    fn record(
        &mut self,
        peer: String,
        result: Result<Reply, RpcError>,
    ) -> Option<(BroadcastDone, BroadcastResults)> {
        self.results.insert(peer, result);
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return None;
        }
        let done = self.done.take()?;
        Some((done, std::mem::take(&mut self.results)))
    }
}

/// A call waiting for its reply.
pub(crate) struct PendingRequest {
    pub(crate) id: u32,
    pub(crate) target: String,
    pub(crate) deadline: Duration,
    pub(crate) resolver: Resolver,
}

/// Outstanding requests keyed by request id.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<u32, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn insert(&mut self, request: PendingRequest) {
        self.entries.insert(request.id, request);
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove every entry whose deadline is not after `now`.
    pub(crate) fn drain_expired(&mut self, now: Duration) -> Vec<PendingRequest> {
        let expired: Vec<u32> = self
            .entries
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.id)
            .collect();
        let mut out: Vec<PendingRequest> = expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    /// Remove every entry, oldest id first.
    pub(crate) fn drain_all(&mut self) -> Vec<PendingRequest> {
        let mut out: Vec<PendingRequest> = self.entries.drain().map(|(_, p)| p).collect();
        out.sort_by_key(|p| p.id);
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
