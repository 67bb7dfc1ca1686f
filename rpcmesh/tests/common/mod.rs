//! Shared harness for the integration tests: a paused-clock, single-threaded
//! runtime and nodes wired to one in-memory network.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use rpcmesh::{
    ConnectOptions, Handlers, HandlerError, MemoryNetworkProvider, MemoryProviders, PeerIdentity,
    RpcConfig, RpcNode, RpcNodeBuilder,
};

pub const SERVER_PORT: u16 = 7000;

/// Run `future` on a current-thread runtime with paused time inside a
/// `LocalSet`.
pub fn run_local<F: Future>(future: F) -> F::Output {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("build runtime");
    tokio::task::LocalSet::new().block_on(&runtime, future)
}

pub fn node(
    network: &MemoryNetworkProvider,
    id: &str,
    role: &str,
    config: RpcConfig,
    handlers: Handlers,
) -> RpcNode<MemoryProviders> {
    RpcNodeBuilder::new(PeerIdentity::new(id, role))
        .config(config)
        .handlers(handlers)
        .build(MemoryProviders::new(network.clone()))
}

/// `math.add(a, b)` and `math.echo(value)`.
pub fn math_handlers() -> Handlers {
    Handlers::new()
        .route_typed("math", "add", |(a, b): (i64, i64)| async move {
            Ok::<_, HandlerError>(a + b)
        })
        .route_typed("math", "echo", |(value,): (serde_json::Value,)| async move {
            Ok::<_, HandlerError>(value)
        })
}

pub fn dial() -> ConnectOptions {
    ConnectOptions::new("127.0.0.1", SERVER_PORT)
}

/// Poll `condition` on the paused clock until it holds or `limit` elapses.
pub async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let every runnable task make progress and `duration` pass.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Read one length-prefixed frame (type byte and body) from a raw stream.
pub async fn read_frame<S>(stream: &mut S) -> Vec<u8>
where
    S: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.expect("read length");
    let mut frame = vec![0u8; u32::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut frame).await.expect("read frame");
    frame
}

/// Everything the remote writes until it closes.
pub async fn read_until_closed<S>(stream: &mut S) -> Vec<u8>
where
    S: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.expect("read to end");
    out
}
