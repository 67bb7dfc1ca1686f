//! In-process network provider built on `tokio::io::duplex`.
//!
//! Listeners are keyed by port, so `bind("0.0.0.0:7000")` and
//! `connect("127.0.0.1:7000")` meet regardless of host. A connect to a port
//! with no live listener fails with `ConnectionRefused`, which lets tests
//! take a server down and bring it back.

use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use tokio::io::DuplexStream;
use tokio::sync::{Mutex, mpsc};

use crate::network::{NetworkProvider, TcpListenerTrait};

/// Capacity of each direction of an in-memory stream.
const DUPLEX_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
struct Backlog {
    generation: u64,
    tx: mpsc::UnboundedSender<(DuplexStream, String)>,
}

#[derive(Debug, Default)]
struct MemoryNetworkState {
    listeners: HashMap<u16, Backlog>,
    next_client: u64,
    next_generation: u64,
}

/// In-memory network shared by every node of a test.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetworkProvider {
    state: Rc<RefCell<MemoryNetworkState>>,
}

impl MemoryNetworkProvider {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a listener is currently bound on `port`.
    pub fn is_bound(&self, port: u16) -> bool {
        self.state.borrow().listeners.contains_key(&port)
    }
}

fn parse_port(addr: &str) -> io::Result<u16> {
    addr.rsplit(':')
        .next()
        .and_then(|port| port.parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid address: {addr}"),
            )
        })
}

#[async_trait(?Send)]
impl NetworkProvider for MemoryNetworkProvider {
    type TcpStream = DuplexStream;
    type TcpListener = MemoryListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::TcpListener> {
        let port = parse_port(addr)?;
        let mut state = self.state.borrow_mut();
        if state.listeners.contains_key(&port) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("port {port} already bound"),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.listeners.insert(port, Backlog { generation, tx });
        tracing::debug!(port, "memory listener bound");

        Ok(MemoryListener {
            port,
            generation,
            backlog: Mutex::new(rx),
            network: self.state.clone(),
            accepted: Cell::new(0),
        })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream> {
        let port = parse_port(addr)?;
        let mut state = self.state.borrow_mut();
        state.next_client += 1;
        let client_addr = format!("mem-client-{}", state.next_client);

        let backlog = state.listeners.get(&port).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no listener on port {port}"),
            )
        })?;

        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
        backlog.tx.send((server, client_addr)).map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("listener on port {port} is gone"),
            )
        })?;
        Ok(client)
    }
}

/// Listener half of the in-memory network. Dropping it frees the port.
#[derive(Debug)]
pub struct MemoryListener {
    port: u16,
    generation: u64,
    backlog: Mutex<mpsc::UnboundedReceiver<(DuplexStream, String)>>,
    network: Rc<RefCell<MemoryNetworkState>>,
    accepted: Cell<u64>,
}

impl MemoryListener {
    /// Number of connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.get()
    }
}

#[async_trait(?Send)]
impl TcpListenerTrait for MemoryListener {
    type TcpStream = DuplexStream;

    async fn accept(&self) -> io::Result<(Self::TcpStream, String)> {
        let mut backlog = self.backlog.lock().await;
        match backlog.recv().await {
            Some(conn) => {
                self.accepted.set(self.accepted.get() + 1);
                Ok(conn)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener closed",
            )),
        }
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(format!("0.0.0.0:{}", self.port))
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut state = self.network.borrow_mut();
        if state
            .listeners
            .get(&self.port)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            state.listeners.remove(&self.port);
            tracing::debug!(port = self.port, "memory listener released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_connect_reaches_listener_by_port() {
        let network = MemoryNetworkProvider::new();
        let listener = network.bind("0.0.0.0:7000").await.expect("bind");

        let mut client = network.connect("127.0.0.1:7000").await.expect("connect");
        let (mut server, remote) = listener.accept().await.expect("accept");
        assert!(remote.starts_with("mem-client-"));
        assert_eq!(listener.accepted(), 1);

        client.write_all(b"ping").await.expect("write");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_connect_without_listener_is_refused() {
        let network = MemoryNetworkProvider::new();
        let err = network.connect("127.0.0.1:7001").await.expect_err("refused");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_dropping_listener_frees_port() {
        let network = MemoryNetworkProvider::new();
        let listener = network.bind("0.0.0.0:7002").await.expect("bind");
        assert!(network.bind("0.0.0.0:7002").await.is_err());

        drop(listener);
        assert!(!network.is_bound(7002));
        assert!(network.connect("127.0.0.1:7002").await.is_err());

        let _again = network.bind("0.0.0.0:7002").await.expect("rebind");
        assert!(network.is_bound(7002));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let network = MemoryNetworkProvider::new();
        let err = network.bind("nowhere").await.expect_err("invalid");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
