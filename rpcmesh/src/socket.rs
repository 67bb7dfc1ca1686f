//! Frame-level socket over any provider stream.
//!
//! A [`FrameSocket`] owns the read half and a [`FrameDecoder`]; writes go
//! through a cloneable [`SocketWriter`] feeding a dedicated writer task, so
//! any component can send without touching the connection task.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use rpcmesh_core::TaskProvider;

use crate::error::CloseReason;
use crate::wire::FrameDecoder;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug)]
enum WriteCommand {
    Bytes(Vec<u8>),
    Shutdown,
}

/// Cloneable write handle of one socket.
///
/// Sends after the socket died are dropped silently.
#[derive(Clone, Debug)]
pub struct SocketWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl SocketWriter {
    /// Queue bytes for writing.
    pub fn send(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let _ = self.tx.send(WriteCommand::Bytes(bytes));
    }

    /// Flush everything queued so far, then shut the write side down.
    pub fn shutdown(&self) {
        let _ = self.tx.send(WriteCommand::Shutdown);
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<WriteCommand>, remote: String)
where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriteCommand::Bytes(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::debug!("write to {} failed: {}", remote, e);
                    break;
                }
            }
            WriteCommand::Shutdown => {
                let _ = writer.shutdown().await;
                break;
            }
        }
    }
    tracing::trace!("writer for {} exiting", remote);
}

/// Read side of a socket, yielding whole frames.
pub struct FrameSocket<S> {
    reader: ReadHalf<S>,
    buf: Vec<u8>,
    decoder: FrameDecoder,
    ready: VecDeque<Result<Vec<u8>, CloseReason>>,
    writer: SocketWriter,
    remote_address: String,
}

impl<S> FrameSocket<S>
where
    S: AsyncRead + AsyncWrite + 'static,
{
    /// Split `stream`, spawn its writer task and start decoding with
    /// `max_frame_len` as the initial bound.
    pub fn open<T: TaskProvider>(
        task: &T,
        stream: S,
        remote_address: String,
        max_frame_len: usize,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        task.spawn_task(
            "socket_writer",
            write_loop::<WriteHalf<S>>(writer, rx, remote_address.clone()),
        );

        Self {
            reader,
            buf: vec![0u8; READ_CHUNK],
            decoder: FrameDecoder::new(max_frame_len),
            ready: VecDeque::new(),
            writer: SocketWriter { tx },
            remote_address,
        }
    }

    /// Next complete frame.
    ///
    /// `Ok(None)` means the remote closed the stream. Any error is fatal for
    /// the connection. Cancel safe: bytes are only consumed once a read
    /// completes, and decoded frames are kept until returned.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CloseReason> {
        loop {
            if let Some(ready) = self.ready.pop_front() {
                return ready.map(Some);
            }
            if self.decoder.is_poisoned() {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            for frame in self.decoder.decode(&self.buf[..n]) {
                self.ready.push_back(frame.map_err(CloseReason::from));
            }
        }
    }

    /// Change the frame length bound, once the handshake completes.
    pub fn set_max_frame_len(&mut self, max_frame_len: usize) {
        self.decoder.set_max_frame_len(max_frame_len);
    }

    /// Write handle of this socket.
    pub fn writer(&self) -> &SocketWriter {
        &self.writer
    }

    /// Remote address as reported by the provider.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Send raw bytes.
    pub fn send(&self, bytes: Vec<u8>) {
        self.writer.send(bytes);
    }

    /// Flush queued writes and shut the socket down.
    pub fn close(&self) {
        self.writer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FramingError, encode_length_prefixed};
    use rpcmesh_core::TokioTaskProvider;

    fn run_local<F: std::future::Future>(future: F) -> F::Output {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        tokio::task::LocalSet::new().block_on(&runtime, future)
    }

    #[test]
    fn test_frames_across_writes() {
        run_local(async {
            let (client, server) = tokio::io::duplex(1024);
            let mut socket = FrameSocket::open(&TokioTaskProvider, server, "peer".into(), 1024);
            let peer = FrameSocket::open(&TokioTaskProvider, client, "local".into(), 1024);

            let mut bytes = encode_length_prefixed(b"first");
            bytes.extend(encode_length_prefixed(b"second"));
            peer.send(bytes[..3].to_vec());
            peer.send(bytes[3..].to_vec());

            assert_eq!(socket.next_frame().await, Ok(Some(b"first".to_vec())));
            assert_eq!(socket.next_frame().await, Ok(Some(b"second".to_vec())));
            assert_eq!(socket.remote_address(), "peer");

            peer.close();
            assert_eq!(socket.next_frame().await, Ok(None));
        });
    }

    #[test]
    fn test_oversize_frame_is_fatal() {
        run_local(async {
            let (client, server) = tokio::io::duplex(4096);
            let mut socket = FrameSocket::open(&TokioTaskProvider, server, "peer".into(), 16);
            let peer = FrameSocket::open(&TokioTaskProvider, client, "local".into(), 16);

            let mut bytes = encode_length_prefixed(b"ok");
            bytes.extend(encode_length_prefixed(&[0u8; 64]));
            bytes.extend(encode_length_prefixed(b"never"));
            peer.send(bytes);

            assert_eq!(socket.next_frame().await, Ok(Some(b"ok".to_vec())));
            assert_eq!(
                socket.next_frame().await,
                Err(CloseReason::Framing(FramingError::TooLong { len: 64, max: 16 }))
            );
            assert_eq!(socket.next_frame().await, Ok(None));
        });
    }
}
