//! # rpcmesh-core
//!
//! Provider abstractions for the rpcmesh RPC framework.
//!
//! - [`NetworkProvider`] / [`TcpListenerTrait`]: bind, accept, connect
//! - [`TimeProvider`]: sleep, deadlines and timeouts
//! - [`TaskProvider`]: `spawn_local` task spawning
//! - [`RandomProvider`]: jitter
//! - [`Providers`]: the four bundled behind one type parameter
//!
//! [`TokioProviders`] runs on real TCP. [`MemoryProviders`] runs the same
//! code over in-process duplex streams, which is what the test suites use.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod memory;
mod network;
mod providers;
mod random;
mod task;
mod time;

pub use memory::{MemoryListener, MemoryNetworkProvider};
pub use network::{NetworkProvider, TcpListenerTrait, TokioNetworkProvider, TokioTcpListener};
pub use providers::{MemoryProviders, Providers, TokioProviders};
pub use random::{RandomProvider, TokioRandomProvider};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
