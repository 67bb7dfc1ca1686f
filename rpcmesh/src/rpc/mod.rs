//! RPC correlation engine.
//!
//! - [`request_id`]: wrapping id counter
//! - [`pending`]: pending-request table and resolvers
//! - [`queue`]: per-target outbound queues
//! - [`handlers`]: route table and payload types
//! - [`clock`]: coarse deadline clock
//! - [`engine`]: issuing, dispatching, sweeping

pub(crate) mod clock;
pub(crate) mod engine;
pub mod handlers;
pub(crate) mod pending;
pub(crate) mod queue;
pub(crate) mod request_id;

pub use handlers::{Args, HandlerFuture, Handlers, Reply, Request};
pub use pending::{BroadcastCallback, BroadcastResults, ReplyCallback};
pub use request_id::MAX_REQUEST_ID;

use pending::{PendingRequest, PendingTable};
use queue::OutboundQueues;
use request_id::RequestIds;

/// Mutable correlation state of one node.
#[derive(Default)]
pub(crate) struct RpcState {
    ids: RequestIds,
    pub(crate) pending: PendingTable,
    pub(crate) queues: OutboundQueues,
}

impl RpcState {
    pub(crate) fn next_request_id(&mut self) -> u32 {
        let pending = &self.pending;
        self.ids.allocate(|id| pending.contains(id))
    }

    /// Remove everything past its deadline, queued or in flight.
    pub(crate) fn take_expired(&mut self, now: std::time::Duration) -> Vec<PendingRequest> {
        let mut expired = self.pending.drain_expired(now);
        expired.extend(
            self.queues
                .drain_expired(now)
                .into_iter()
                .filter_map(|entry| entry.pending),
        );
        expired
    }

    /// Remove every pending and queued request.
    pub(crate) fn take_all(&mut self) -> Vec<PendingRequest> {
        let mut all = self.pending.drain_all();
        all.extend(
            self.queues
                .drain_all()
                .into_iter()
                .filter_map(|entry| entry.pending),
        );
        all
    }
}
