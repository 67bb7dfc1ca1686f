//! The Active phase shared by initiator and acceptor connections.

use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rpcmesh_core::{Providers, RandomProvider, TimeProvider};

use super::Link;
use super::batch::SendBatch;
use crate::config::{HEARTBEAT_ACK_TIMEOUT, HEARTBEAT_JITTER, MIN_HEARTBEAT_PERIOD};
use crate::error::CloseReason;
use crate::identity::PeerIdentity;
use crate::node::core::NodeCore;
use crate::socket::FrameSocket;
use crate::wire::{Frame, FrameType, WireError, close_frame, heartbeat_frame};

/// Heartbeat duties of one side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Heartbeat {
    /// Sends heartbeats on a jittered period and expects each to be answered.
    Initiator {
        interval: Duration,
        next_send: Duration,
        ack_deadline: Option<Duration>,
    },
    /// Answers heartbeats and gives up when none arrives in time.
    Acceptor { timeout: Duration, deadline: Duration },
}

/// What a heartbeat timer firing means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatTick {
    Send,
    Expired,
    Idle,
}

impl Heartbeat {
    pub(crate) fn initiator(now: Duration, interval: Duration, jitter_ms: u64) -> Self {
        Heartbeat::Initiator {
            interval,
            next_send: now + send_period(interval, jitter_ms),
            ack_deadline: None,
        }
    }

    pub(crate) fn acceptor(now: Duration, interval: Duration) -> Self {
        let timeout = interval * 2;
        Heartbeat::Acceptor {
            timeout,
            deadline: now + timeout,
        }
    }

    /// When the timer must next fire.
    pub(crate) fn next_deadline(&self) -> Duration {
        match *self {
            Heartbeat::Initiator {
                next_send,
                ack_deadline,
                ..
            } => ack_deadline.map_or(next_send, |ack| ack.min(next_send)),
            Heartbeat::Acceptor { deadline, .. } => deadline,
        }
    }

    /// Timer fired at `now`.
    pub(crate) fn on_timer(&mut self, now: Duration, jitter_ms: u64) -> HeartbeatTick {
        match self {
            Heartbeat::Initiator {
                interval,
                next_send,
                ack_deadline,
            } => {
                if ack_deadline.is_some_and(|ack| ack <= now) {
                    return HeartbeatTick::Expired;
                }
                if *next_send > now {
                    return HeartbeatTick::Idle;
                }
                *next_send = now + send_period(*interval, jitter_ms);
                if ack_deadline.is_none() {
                    *ack_deadline = Some(now + HEARTBEAT_ACK_TIMEOUT);
                }
                HeartbeatTick::Send
            }
            Heartbeat::Acceptor { deadline, .. } => {
                if *deadline <= now {
                    HeartbeatTick::Expired
                } else {
                    HeartbeatTick::Idle
                }
            }
        }
    }

    /// A heartbeat frame arrived. Returns true when it must be answered.
    pub(crate) fn on_frame(&mut self, now: Duration) -> bool {
        match self {
            Heartbeat::Initiator { ack_deadline, .. } => {
                *ack_deadline = None;
                false
            }
            Heartbeat::Acceptor { timeout, deadline } => {
                *deadline = now + *timeout;
                true
            }
        }
    }
}

/// `interval - jitter window + jitter`, never below the minimum period.
fn send_period(interval: Duration, jitter_ms: u64) -> Duration {
    let period = interval.saturating_sub(HEARTBEAT_JITTER) + Duration::from_millis(jitter_ms);
    period.max(MIN_HEARTBEAT_PERIOD)
}

/// Random draw for [`send_period`].
pub(crate) fn jitter<P: Providers>(providers: &P) -> u64 {
    providers
        .random()
        .random_range(0..HEARTBEAT_JITTER.as_millis() as u64)
}

/// Build the pool-facing link of a freshly registered socket, batching
/// when the remote role's send interval asks for it.
pub(crate) fn open_link<P, S>(
    core: &NodeCore<P>,
    socket: &FrameSocket<S>,
    role: &str,
) -> (Link, mpsc::UnboundedReceiver<CloseReason>)
where
    P: Providers,
    S: AsyncRead + AsyncWrite + 'static,
{
    let (close_tx, close_rx) = mpsc::unbounded_channel();
    let batch = core
        .config
        .send_interval
        .for_role(role)
        .map(|_| SendBatch::new(core.config.flush_threshold));
    let link = Link::new(
        core.next_link_id(),
        socket.writer().clone(),
        batch,
        close_tx,
        socket.remote_address(),
    );
    (link, close_rx)
}

/// Close a socket that never reached Active, telling the remote why when
/// the reason warrants it.
pub(crate) fn reject<S>(socket: &FrameSocket<S>, reason: &CloseReason)
where
    S: AsyncRead + AsyncWrite + 'static,
{
    if let Some(farewell) = reason.farewell() {
        socket.send(close_frame(&farewell));
    }
    socket.close();
}

/// Everything the Active loop needs besides the socket.
pub(crate) struct ActiveConnection<P: Providers> {
    pub(crate) core: Rc<NodeCore<P>>,
    pub(crate) peer: Rc<PeerIdentity>,
    pub(crate) link: Link,
    pub(crate) close_rx: mpsc::UnboundedReceiver<CloseReason>,
    pub(crate) heartbeat: Heartbeat,
    /// Cancelled on node shutdown, or on `ConnectHandle::close` for initiators.
    pub(crate) stop: CancellationToken,
}

impl<P: Providers> ActiveConnection<P> {
    /// Serve the connection until it closes, then run Closing and Dead.
    pub(crate) async fn run<S>(mut self, socket: &mut FrameSocket<S>) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        let reason = self.serve(socket).await;

        let farewell = reason.farewell();
        self.link.finish(farewell.as_deref());
        if self.core.deactivate(&self.peer, self.link.id()) {
            tracing::debug!(peer = %self.peer.id, "peer detached");
        }
        self.core.logger.info(&format!(
            "connection to {} ({}) closed: {}",
            self.peer.id,
            socket.remote_address(),
            reason
        ));
        reason
    }

    async fn serve<S>(&mut self, socket: &mut FrameSocket<S>) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        let time = self.core.providers.time().clone();
        let flush_every = self
            .link
            .is_batched()
            .then(|| self.core.config.send_interval.for_role(&self.peer.role))
            .flatten();
        let mut next_flush = flush_every.map(|every| time.now() + every);

        loop {
            let heartbeat_at = self.heartbeat.next_deadline();
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => {
                    return if self.core.shutdown.is_cancelled() {
                        CloseReason::Shutdown
                    } else {
                        CloseReason::ClosedByUser("closed by user".to_string())
                    };
                }

                Some(reason) = self.close_rx.recv() => return reason,

                _ = time.sleep_until(heartbeat_at) => {
                    let jitter_ms = jitter(&self.core.providers);
                    match self.heartbeat.on_timer(time.now(), jitter_ms) {
                        HeartbeatTick::Send => self.link.send(heartbeat_frame()),
                        HeartbeatTick::Expired => return CloseReason::HeartbeatTimeout,
                        HeartbeatTick::Idle => {}
                    }
                }

                _ = async {
                    match next_flush {
                        Some(at) => { let _ = time.sleep_until(at).await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.link.flush();
                    next_flush = flush_every.map(|every| time.now() + every);
                }

                frame = socket.next_frame() => {
                    let raw = match frame {
                        Ok(Some(raw)) => raw,
                        Ok(None) => return CloseReason::Eof,
                        Err(reason) => return reason,
                    };
                    if let Err(reason) = self.on_frame(raw, time.now()) {
                        return reason;
                    }
                }
            }
        }
    }

    fn on_frame(&mut self, raw: Vec<u8>, now: Duration) -> Result<(), CloseReason> {
        let frame = Frame::parse(raw).map_err(CloseReason::ProtocolViolation)?;
        match frame.kind {
            FrameType::Heartbeat => {
                if self.heartbeat.on_frame(now) {
                    self.link.send(heartbeat_frame());
                }
                Ok(())
            }
            FrameType::RpcMsg | FrameType::RpcMsgAwait => self
                .core
                .dispatch(&self.peer, frame.kind, &frame.body)
                .map_err(CloseReason::ProtocolViolation),
            FrameType::CloseClient => Err(CloseReason::ClosedByPeer(
                String::from_utf8_lossy(&frame.body).into_owned(),
            )),
            FrameType::Register => Err(CloseReason::ProtocolViolation(
                WireError::UnexpectedFrame(FrameType::Register),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_send_period_jitter_window() {
        assert_eq!(send_period(secs(60), 0), secs(55));
        assert_eq!(send_period(secs(60), 4_999), Duration::from_millis(59_999));
        assert_eq!(send_period(secs(5), 0), secs(5));
        assert_eq!(send_period(secs(7), 1_000), secs(5));
    }

    #[test]
    fn test_initiator_sends_then_expires_without_ack() {
        let mut hb = Heartbeat::initiator(secs(0), secs(30), 0);
        assert_eq!(hb.next_deadline(), secs(25));
        assert_eq!(hb.on_timer(secs(10), 0), HeartbeatTick::Idle);

        assert_eq!(hb.on_timer(secs(25), 0), HeartbeatTick::Send);
        // Ack timer (10s) is now earlier than the next send (25s).
        assert_eq!(hb.next_deadline(), secs(35));
        assert_eq!(hb.on_timer(secs(35), 0), HeartbeatTick::Expired);
    }

    #[test]
    fn test_initiator_ack_disarms_timer() {
        let mut hb = Heartbeat::initiator(secs(0), secs(30), 0);
        assert_eq!(hb.on_timer(secs(25), 0), HeartbeatTick::Send);
        assert!(!hb.on_frame(secs(26)));
        assert_eq!(hb.next_deadline(), secs(50));
        assert_eq!(hb.on_timer(secs(50), 0), HeartbeatTick::Send);
    }

    #[test]
    fn test_ack_timer_is_not_rearmed_by_later_sends() {
        let mut hb = Heartbeat::initiator(secs(0), secs(5), 0);
        assert_eq!(hb.on_timer(secs(5), 0), HeartbeatTick::Send);
        assert_eq!(hb.on_timer(secs(10), 0), HeartbeatTick::Send);
        assert_eq!(hb.on_timer(secs(15), 0), HeartbeatTick::Expired);
    }

    #[test]
    fn test_acceptor_refreshes_on_heartbeat() {
        let mut hb = Heartbeat::acceptor(secs(0), secs(10));
        assert_eq!(hb.next_deadline(), secs(20));
        assert!(hb.on_frame(secs(15)));
        assert_eq!(hb.next_deadline(), secs(35));
        assert_eq!(hb.on_timer(secs(20), 0), HeartbeatTick::Idle);
        assert_eq!(hb.on_timer(secs(35), 0), HeartbeatTick::Expired);
    }
}
