//! Connection lifecycle.
//!
//! One task per physical socket drives it through
//! `Connecting → AwaitingRegister → Active → Closing → Dead`:
//!
//! - [`acceptor`]: sockets accepted by `listen`, starting in AwaitingRegister
//! - [`initiator`]: sockets opened by `connect`, looping back to Connecting
//!   after every close the local user did not ask for
//! - [`connection`]: the Active loop shared by both sides
//!
//! Other components reach a live connection through its [`Link`], which is
//! what the socket pool stores.

pub(crate) mod acceptor;
pub(crate) mod batch;
pub(crate) mod connection;
pub(crate) mod initiator;

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc;

use crate::error::CloseReason;
use crate::socket::SocketWriter;
use batch::SendBatch;

/// Phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Initiator waiting for its delay to elapse or the socket to open.
    Connecting,
    /// Socket open, register exchange in progress.
    AwaitingRegister,
    /// Registered; present in the socket pool.
    Active,
    /// Flushing and sending the close notice.
    Closing,
    /// Socket closed; the initiator may still reconnect from here.
    Dead,
}

/// Send side of an Active connection, as held by the socket pool.
#[derive(Clone, Debug)]
pub(crate) struct Link {
    id: u64,
    writer: SocketWriter,
    batch: Option<Rc<RefCell<SendBatch>>>,
    close_tx: mpsc::UnboundedSender<CloseReason>,
    remote_address: Rc<str>,
}

impl Link {
    pub(crate) fn new(
        id: u64,
        writer: SocketWriter,
        batch: Option<SendBatch>,
        close_tx: mpsc::UnboundedSender<CloseReason>,
        remote_address: &str,
    ) -> Self {
        Self {
            id,
            writer,
            batch: batch.map(|b| Rc::new(RefCell::new(b))),
            close_tx,
            remote_address: Rc::from(remote_address),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub(crate) fn is_batched(&self) -> bool {
        self.batch.is_some()
    }

    /// Write one encoded frame, through the batch buffer when batching is on.
    pub(crate) fn send(&self, frame: Vec<u8>) {
        match &self.batch {
            Some(batch) => {
                let full = batch.borrow_mut().push(&frame);
                if full {
                    self.flush();
                }
            }
            None => self.writer.send(frame),
        }
    }

    /// Write out everything buffered.
    pub(crate) fn flush(&self) {
        let pending = self.batch.as_ref().and_then(|b| b.borrow_mut().take());
        if let Some(bytes) = pending {
            self.writer.send(bytes);
        }
    }

    /// Ask the owning connection task to close.
    pub(crate) fn close(&self, reason: CloseReason) {
        let _ = self.close_tx.send(reason);
    }

    /// Flush, send an optional `closeClient` notice, then shut the write side.
    pub(crate) fn finish(&self, farewell: Option<&str>) {
        self.flush();
        if let Some(reason) = farewell {
            self.writer.send(crate::wire::close_frame(reason));
        }
        self.writer.shutdown();
    }
}
