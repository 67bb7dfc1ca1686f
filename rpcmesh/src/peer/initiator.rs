//! Outbound connections with automatic reconnect.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rpcmesh_core::{NetworkProvider, Providers, TimeProvider};

use super::ConnectionPhase;
use super::connection::{ActiveConnection, Heartbeat, jitter, open_link, reject};
use crate::config::{MIN_HEARTBEAT_SECS, REGISTER_TIMEOUT};
use crate::error::{CloseReason, HandshakeError};
use crate::identity::PeerIdentity;
use crate::node::core::NodeCore;
use crate::socket::FrameSocket;
use crate::wire::{Frame, FrameType, RegisterReply, RegisterRequest, register_frame};

/// Where and how an initiator connects.
#[derive(Debug, Clone)]
pub(crate) struct Dial {
    pub(crate) addr: String,
    pub(crate) token: String,
}

/// Connect, register and serve until closed; reconnect after every close
/// the local side did not ask for.
pub(crate) async fn run_initiator<P: Providers>(
    core: Rc<NodeCore<P>>,
    dial: Dial,
    stop: CancellationToken,
    phase: Rc<Cell<ConnectionPhase>>,
) {
    let time = core.providers.time().clone();
    let mut delay = Duration::ZERO;

    loop {
        phase.set(ConnectionPhase::Connecting);
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = time.sleep(delay) => {}
            }
        }
        delay = core.config.reconnect_delay();

        let reason = connect_once(&core, &dial, &stop, &phase).await;
        phase.set(ConnectionPhase::Dead);
        if reason.is_local() || stop.is_cancelled() {
            break;
        }
        core.logger.debug(&format!(
            "reconnecting to {} in {:?} after: {}",
            dial.addr, delay, reason
        ));
    }

    phase.set(ConnectionPhase::Dead);
    tracing::debug!(addr = %dial.addr, "initiator stopped");
}

fn stopped<P: Providers>(core: &NodeCore<P>) -> CloseReason {
    if core.shutdown.is_cancelled() {
        CloseReason::Shutdown
    } else {
        CloseReason::ClosedByUser("closed by user".to_string())
    }
}

/// One pass through Connecting, AwaitingRegister and Active.
async fn connect_once<P: Providers>(
    core: &Rc<NodeCore<P>>,
    dial: &Dial,
    stop: &CancellationToken,
    phase: &Cell<ConnectionPhase>,
) -> CloseReason {
    let network = core.providers.network().clone();
    let time = core.providers.time().clone();

    let stream = tokio::select! {
        biased;
        _ = stop.cancelled() => return stopped(core),
        connected = time.timeout(REGISTER_TIMEOUT, network.connect(&dial.addr)) => match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                core.logger.error(&format!("connect to {} failed: {}", dial.addr, e));
                return CloseReason::from(e);
            }
            Err(_) => {
                core.logger.error(&format!("connect to {} timed out", dial.addr));
                return CloseReason::Io("connect timeout".to_string());
            }
        },
    };
    if let Err(e) = network.set_nodelay(&stream, core.config.no_delay) {
        tracing::debug!(addr = %dial.addr, "set_nodelay failed: {}", e);
    }

    phase.set(ConnectionPhase::AwaitingRegister);
    let mut socket = FrameSocket::open(
        core.providers.task(),
        stream,
        dial.addr.clone(),
        core.config.max_frame_len,
    );
    let request = RegisterRequest {
        peer_identity: (*core.identity).clone(),
        token: dial.token.clone(),
    };
    match register_frame(&request) {
        Ok(frame) => socket.send(frame),
        Err(e) => {
            socket.close();
            return HandshakeError::Malformed(e.to_string()).into();
        }
    }

    let registered = tokio::select! {
        biased;
        _ = stop.cancelled() => Err(stopped(core)),
        _ = time.sleep(REGISTER_TIMEOUT) => Err(CloseReason::from(HandshakeError::Timeout)),
        frame = socket.next_frame() => check_reply(core, frame),
    };
    let (identity, interval) = match registered {
        Ok(registered) => registered,
        Err(reason) => {
            reject(&socket, &reason);
            core.logger.error(&format!(
                "register with {} failed: {}",
                dial.addr, reason
            ));
            return reason;
        }
    };

    let (link, close_rx) = open_link(core, &socket, &identity.role);
    let peer = core.activate(identity, &link);
    phase.set(ConnectionPhase::Active);

    let active = ActiveConnection {
        core: core.clone(),
        peer,
        link,
        close_rx,
        heartbeat: Heartbeat::initiator(time.now(), interval, jitter(&core.providers)),
        stop: stop.clone(),
    };
    let reason = active.run(&mut socket).await;
    phase.set(ConnectionPhase::Closing);
    reason
}

/// Validate the acceptor's register reply.
fn check_reply<P: Providers>(
    core: &NodeCore<P>,
    frame: Result<Option<Vec<u8>>, CloseReason>,
) -> Result<(PeerIdentity, Duration), CloseReason> {
    let raw = frame?.ok_or(CloseReason::Eof)?;
    let type_byte = raw.first().copied().unwrap_or_default();
    let frame = Frame::parse(raw).map_err(|_| HandshakeError::UnexpectedFrame(type_byte))?;
    match frame.kind {
        FrameType::Register => {}
        FrameType::CloseClient => {
            return Err(CloseReason::ClosedByPeer(
                String::from_utf8_lossy(&frame.body).into_owned(),
            ));
        }
        other => return Err(HandshakeError::UnexpectedFrame(other as u8).into()),
    }

    let reply: RegisterReply = serde_json::from_slice(&frame.body)
        .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    let identity = reply.peer_identity;
    if !identity.is_complete() {
        return Err(HandshakeError::MissingIdentity.into());
    }
    if core.is_registered(&identity.id) {
        return Err(HandshakeError::DuplicatePeer { id: identity.id }.into());
    }

    let interval = Duration::from_millis(reply.heartbeat_interval_ms);
    let interval = if interval >= Duration::from_secs(MIN_HEARTBEAT_SECS) {
        interval
    } else {
        core.config.heartbeat_interval()
    };
    Ok((identity, interval))
}
