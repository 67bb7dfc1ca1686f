//! Network provider abstraction over raw TCP.
//!
//! The RPC layer only needs four socket primitives: bind a listener, accept,
//! connect, and tune the stream. Everything above that works on any
//! `AsyncRead + AsyncWrite` stream the provider hands out.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Provider trait for creating network connections and listeners.
///
/// Single-threaded design: no `Send` bounds. `Clone` lets every connection
/// task hold its own handle to the provider.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// The stream type for this provider.
    type TcpStream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// The listener type for this provider.
    type TcpListener: TcpListenerTrait<TcpStream = Self::TcpStream> + 'static;

    /// Create a listener bound to the given `host:port` address.
    async fn bind(&self, addr: &str) -> io::Result<Self::TcpListener>;

    /// Connect to a remote `host:port` address.
    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream>;

    /// Enable or disable Nagle's algorithm on a stream.
    ///
    /// Providers without a TCP stack accept the call and do nothing.
    fn set_nodelay(&self, stream: &Self::TcpStream, nodelay: bool) -> io::Result<()> {
        let _ = (stream, nodelay);
        Ok(())
    }
}

/// Trait for listeners that can accept connections.
#[async_trait(?Send)]
pub trait TcpListenerTrait {
    /// The stream type that this listener produces.
    type TcpStream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Accept a single incoming connection, returning it with the remote address.
    async fn accept(&self) -> io::Result<(Self::TcpStream, String)>;

    /// Get the local address this listener is bound to.
    fn local_addr(&self) -> io::Result<String>;
}

/// Real Tokio networking implementation.
#[derive(Debug, Clone, Default)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type TcpStream = tokio::net::TcpStream;
    type TcpListener = TokioTcpListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::TcpListener> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(TokioTcpListener { inner: listener })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream> {
        tokio::net::TcpStream::connect(addr).await
    }

    fn set_nodelay(&self, stream: &Self::TcpStream, nodelay: bool) -> io::Result<()> {
        stream.set_nodelay(nodelay)
    }
}

/// Wrapper for Tokio TcpListener to implement our trait.
#[derive(Debug)]
pub struct TokioTcpListener {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl TcpListenerTrait for TokioTcpListener {
    type TcpStream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::TcpStream, String)> {
        let (stream, addr) = self.inner.accept().await?;
        Ok((stream, addr.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}
