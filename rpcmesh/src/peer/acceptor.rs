//! Accepted sockets: registration check, then the Active loop.

use std::rc::Rc;

use rpcmesh_core::{NetworkProvider, Providers, TaskProvider, TcpListenerTrait, TimeProvider};

use super::connection::{ActiveConnection, Heartbeat, open_link, reject};
use crate::config::REGISTER_TIMEOUT;
use crate::error::{CloseReason, HandshakeError};
use crate::identity::PeerIdentity;
use crate::node::core::NodeCore;
use crate::socket::FrameSocket;
use crate::wire::{
    Frame, FrameType, MAX_FRAME_LEN_UNREGISTERED, RegisterReply, RegisterRequest, register_frame,
};

type Stream<P> = <<P as Providers>::Network as NetworkProvider>::TcpStream;
type Listener<P> = <<P as Providers>::Network as NetworkProvider>::TcpListener;

/// Accept connections until the node shuts down, one task per socket.
pub(crate) async fn accept_loop<P: Providers>(
    core: Rc<NodeCore<P>>,
    listener: Listener<P>,
    token: Rc<str>,
) {
    loop {
        tokio::select! {
            _ = core.shutdown.cancelled() => {
                tracing::debug!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    tracing::debug!(%remote, "accepted connection");
                    let task = core.providers.task().clone();
                    task.spawn_task(
                        "rpcmesh_accepted",
                        serve_accepted(core.clone(), stream, remote, token.clone()),
                    );
                }
                Err(e) => {
                    core.logger.error(&format!("accept failed: {e}"));
                }
            }
        }
    }
}

async fn serve_accepted<P: Providers>(
    core: Rc<NodeCore<P>>,
    stream: Stream<P>,
    remote: String,
    token: Rc<str>,
) {
    if let Err(e) = core
        .providers
        .network()
        .set_nodelay(&stream, core.config.no_delay)
    {
        tracing::debug!(%remote, "set_nodelay failed: {}", e);
    }
    let task = core.providers.task().clone();
    let mut socket = FrameSocket::open(&task, stream, remote, MAX_FRAME_LEN_UNREGISTERED);

    let time = core.providers.time().clone();
    let registered = tokio::select! {
        biased;
        _ = core.shutdown.cancelled() => Err(CloseReason::Shutdown),
        _ = time.sleep(REGISTER_TIMEOUT) => Err(CloseReason::from(HandshakeError::Timeout)),
        frame = socket.next_frame() => check_register(&core, frame, &token),
    };

    let identity = match registered {
        Ok(identity) => identity,
        Err(reason) => {
            reject(&socket, &reason);
            core.logger.error(&format!(
                "rejected connection from {}: {}",
                socket.remote_address(),
                reason
            ));
            return;
        }
    };

    let reply = RegisterReply {
        peer_identity: (*core.identity).clone(),
        heartbeat_interval_ms: core.config.heartbeat_interval().as_millis() as u64,
    };
    match register_frame(&reply) {
        Ok(frame) => socket.send(frame),
        Err(e) => {
            core.logger.error(&format!("cannot encode register reply: {e}"));
            socket.close();
            return;
        }
    }
    socket.set_max_frame_len(core.config.max_frame_len);

    let (link, close_rx) = open_link(&core, &socket, &identity.role);
    let peer = core.activate(identity, &link);

    let active = ActiveConnection {
        heartbeat: Heartbeat::acceptor(time.now(), core.config.heartbeat_interval()),
        stop: core.shutdown.clone(),
        core,
        peer,
        link,
        close_rx,
    };
    active.run(&mut socket).await;
}

/// Validate the first frame of an accepted socket, in order: frame type,
/// JSON, identity, token, duplicate id.
fn check_register<P: Providers>(
    core: &NodeCore<P>,
    frame: Result<Option<Vec<u8>>, CloseReason>,
    token: &str,
) -> Result<PeerIdentity, CloseReason> {
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

    let request: RegisterRequest = serde_json::from_slice(&frame.body)
        .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    let identity = request.peer_identity;
    if !identity.is_complete() {
        return Err(HandshakeError::MissingIdentity.into());
    }
    if request.token != token {
        return Err(HandshakeError::InvalidToken.into());
    }
    if core.is_registered(&identity.id) {
        return Err(HandshakeError::DuplicatePeer { id: identity.id }.into());
    }
    Ok(identity)
}
