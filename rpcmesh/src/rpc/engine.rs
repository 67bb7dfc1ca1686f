//! Issuing calls, dispatching inbound RPC frames and expiring requests.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use rpcmesh_core::{Providers, TaskProvider, TimeProvider};

use super::handlers::{Args, Reply, Request};
use super::pending::{BroadcastAggregate, BroadcastDone, PendingRequest, Resolver};
use super::queue::QueuedFrame;
use crate::config::QUEUE_DEADLINE_BACKDATE;
use crate::error::RpcError;
use crate::identity::PeerIdentity;
use crate::node::core::NodeCore;
use crate::wire::{FrameType, LENGTH_PREFIX_SIZE, RpcHeader, RpcMessage, WireError};

impl<P: Providers> NodeCore<P> {
    /// Send one call or notification to `target`.
    ///
    /// Never fails synchronously: encode errors, a disabled queue, queue
    /// overflow and a node already shut down all reach the resolver from a
    /// spawned task.
    pub(crate) fn send_request(
        self: &Rc<Self>,
        target: &str,
        kind: FrameType,
        route: &str,
        method: &str,
        args: Args,
        resolver: Option<Resolver>,
    ) {
        if self.shutdown.is_cancelled() {
            tracing::debug!(peer = %target, "call after shutdown");
            self.fail_later(resolver, RpcError::Timeout);
            return;
        }
        if target == self.identity.id {
            self.call_self(route, method, args, resolver);
            return;
        }

        let id = resolver
            .as_ref()
            .map(|_| self.rpc.borrow_mut().next_request_id());
        let frame = match self.encode_request(kind, route, method, id, args) {
            Ok(frame) => frame,
            Err(err) => {
                self.logger.error(&format!(
                    "cannot encode {route}.{method} for {target}: {err}"
                ));
                self.fail_later(resolver, err);
                return;
            }
        };

        let pending = match (id, resolver) {
            (Some(id), Some(resolver)) => Some(PendingRequest {
                id,
                target: target.to_string(),
                deadline: self.clock.deadline(),
                resolver,
            }),
            _ => None,
        };

        let link = self.pool.borrow().get(target);
        match link {
            Some(link) => {
                if let Some(pending) = pending {
                    self.rpc.borrow_mut().pending.insert(pending);
                }
                link.send(frame);
            }
            None => self.enqueue(target, frame, pending),
        }
    }

    fn encode_request(
        &self,
        kind: FrameType,
        route: &str,
        method: &str,
        id: Option<u32>,
        args: Args,
    ) -> Result<Vec<u8>, RpcError> {
        let header = RpcHeader::request(route, method, id);
        let frame = RpcMessage::encode(
            kind,
            header,
            &Value::Array(args.values),
            args.binary.as_deref(),
        )?;
        let len = frame.len() - LENGTH_PREFIX_SIZE;
        if len > self.config.max_frame_len {
            return Err(RpcError::FrameTooLarge {
                len,
                max: self.config.max_frame_len,
            });
        }
        Ok(frame)
    }

    fn enqueue(self: &Rc<Self>, target: &str, frame: Vec<u8>, pending: Option<PendingRequest>) {
        let cap = self.config.outbound_queue_cap;
        if cap == 0 {
            self.fail_later(
                pending.map(|p| p.resolver),
                RpcError::NoSuchServer {
                    target: target.to_string(),
                },
            );
            return;
        }

        let entry = QueuedFrame {
            frame,
            pending,
            deadline: self
                .clock
                .deadline()
                .saturating_sub(QUEUE_DEADLINE_BACKDATE),
        };
        let dropped = self.rpc.borrow_mut().queues.push(target, entry, cap);
        if !dropped.is_empty() {
            self.logger.error(&format!(
                "outbound queue for {target} full, dropped {} oldest frames",
                dropped.len()
            ));
        }
        for entry in dropped {
            self.fail_later(entry.pending.map(|p| p.resolver), RpcError::Timeout);
        }
    }

    /// Run a local handler on the next scheduling tick.
    fn call_self(self: &Rc<Self>, route: &str, method: &str, args: Args, resolver: Option<Resolver>) {
        let id = resolver.map(|resolver| {
            let mut rpc = self.rpc.borrow_mut();
            let id = rpc.next_request_id();
            rpc.pending.insert(PendingRequest {
                id,
                target: self.identity.id.clone(),
                deadline: self.clock.deadline(),
                resolver,
            });
            id
        });

        let request = Request {
            caller: self.identity.clone(),
            args: args.values,
            binary: args.binary,
        };
        let core = self.clone();
        let (route, method) = (route.to_string(), method.to_string());
        self.providers.task().spawn_task("rpcmesh_self_call", async move {
            let result = core.handlers.invoke(&route, &method, request).await;
            match (result, id) {
                (Ok(reply), Some(id)) => core.complete(id, reply),
                (Ok(_), None) => {}
                (Err(err), _) => core
                    .logger
                    .error(&format!("local handler {route}.{method} failed: {err}")),
            }
        });
    }

    /// Fan a call out to every reachable peer with `role`, the local node
    /// included when its role matches.
    pub(crate) fn broadcast(
        self: &Rc<Self>,
        role: &str,
        kind: FrameType,
        route: &str,
        method: &str,
        args: Args,
        done: Option<BroadcastDone>,
    ) {
        let targets: Vec<String> = {
            let registry = self.registry.borrow();
            let pool = self.pool.borrow();
            registry
                .by_role(role)
                .iter()
                .filter(|peer| peer.id == self.identity.id || pool.contains(&peer.id))
                .map(|peer| peer.id.clone())
                .collect()
        };

        let Some(done) = done else {
            for target in &targets {
                self.send_request(target, kind, route, method, args.clone(), None);
            }
            return;
        };

        if targets.is_empty() {
            self.providers
                .task()
                .spawn_task("rpcmesh_broadcast_empty", async move {
                    done.deliver(Default::default())
                });
            return;
        }
        let aggregate = Rc::new(RefCell::new(BroadcastAggregate::new(targets.len(), done)));
        for target in targets {
            let resolver = Resolver::Broadcast {
                aggregate: aggregate.clone(),
                peer: target.clone(),
            };
            self.send_request(&target, kind, route, method, args.clone(), Some(resolver));
        }
    }

    /// Handle an `rpcMsg`/`rpcMsgAwait` frame received from `peer`.
    pub(crate) fn dispatch(
        self: &Rc<Self>,
        peer: &Rc<PeerIdentity>,
        kind: FrameType,
        body: &[u8],
    ) -> Result<(), WireError> {
        let message = RpcMessage::decode(body)?;
        let RpcHeader {
            route,
            method,
            request_id,
            ..
        } = message.header;

        match (route, method, request_id) {
            (Some(route), Some(method), request_id) => {
                let args = match message.payload {
                    Value::Array(values) => values,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                let request = Request {
                    caller: peer.clone(),
                    args,
                    binary: message.binary,
                };
                self.serve(peer, kind, route, method, request_id, request);
            }
            (None, None, Some(id)) => self.complete(
                id,
                Reply {
                    value: message.payload,
                    binary: message.binary,
                },
            ),
            _ => {
                self.logger.debug(&format!(
                    "dropping rpc frame from {} without route or request id",
                    peer.id
                ));
            }
        }
        Ok(())
    }

    /// Run the handler in its own task. The reply goes to whatever
    /// connection `peer` has when the handler finishes, or into its queue.
    fn serve(
        self: &Rc<Self>,
        peer: &Rc<PeerIdentity>,
        kind: FrameType,
        route: String,
        method: String,
        request_id: Option<u32>,
        request: Request,
    ) {
        let core = self.clone();
        let caller = peer.id.clone();
        self.providers.task().spawn_task("rpcmesh_handler", async move {
            let reply = match core.handlers.invoke(&route, &method, request).await {
                Ok(reply) => reply,
                Err(err) => {
                    core.logger.error(&format!(
                        "handler {route}.{method} called by {caller} failed: {err}"
                    ));
                    return;
                }
            };
            let Some(id) = request_id else {
                return;
            };
            match RpcMessage::encode(kind, RpcHeader::reply(id), &reply.value, reply.binary.as_deref()) {
                Ok(frame) => {
                    let link = core.pool.borrow().get(&caller);
                    match link {
                        Some(link) => link.send(frame),
                        None => core.enqueue(&caller, frame, None),
                    }
                }
                Err(err) => core.logger.error(&format!(
                    "cannot encode reply to {route}.{method} for {caller}: {err}"
                )),
            }
        });
    }

    /// Resolve the pending request `id`; late or unknown replies are dropped.
    pub(crate) fn complete(&self, id: u32, reply: Reply) {
        let pending = self.rpc.borrow_mut().pending.remove(id);
        match pending {
            Some(pending) => pending.resolver.resolve(Ok(reply)),
            None => tracing::debug!(request_id = id, "reply for unknown or expired request"),
        }
    }

    /// Expire every request past its deadline.
    pub(crate) fn sweep(&self) {
        let now = self.providers.time().now();
        let expired = self.rpc.borrow_mut().take_expired(now);
        for pending in expired {
            tracing::debug!(request_id = pending.id, target = %pending.target, "rpc timeout");
            pending.resolver.resolve(Err(RpcError::Timeout));
        }
    }

    /// Fail everything still pending or queued. Runs once the node shuts
    /// down, when no reply can arrive anymore.
    pub(crate) fn fail_all(&self) {
        let outstanding = self.rpc.borrow_mut().take_all();
        if !outstanding.is_empty() {
            tracing::debug!(count = outstanding.len(), "failing outstanding calls at shutdown");
        }
        for pending in outstanding {
            pending.resolver.resolve(Err(RpcError::Timeout));
        }
    }

    /// Resolve with `err` from a fresh task, outside the caller's stack.
    fn fail_later(&self, resolver: Option<Resolver>, err: RpcError) {
        if let Some(resolver) = resolver {
            self.providers
                .task()
                .spawn_task("rpcmesh_fail", async move { resolver.resolve(Err(err)) });
        }
    }
}
