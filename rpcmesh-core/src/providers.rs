//! Provider bundle trait for simplified type parameters.
//!
//! Every RPC component is generic over a single `P: Providers` instead of
//! four separate provider parameters.

use crate::{
    MemoryNetworkProvider, NetworkProvider, RandomProvider, TaskProvider, TimeProvider,
    TokioNetworkProvider, TokioRandomProvider, TokioTaskProvider, TokioTimeProvider,
};

/// Bundle of all provider types for a runtime environment.
pub trait Providers: Clone + 'static {
    /// Network provider type for TCP connections and listeners.
    type Network: NetworkProvider + Clone + 'static;

    /// Time provider type for sleep, timeout, and time queries.
    type Time: TimeProvider + Clone + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + Clone + 'static;

    /// Random provider type.
    type Random: RandomProvider + Clone + 'static;

    /// Get the network provider instance.
    fn network(&self) -> &Self::Network;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the random provider instance.
    fn random(&self) -> &Self::Random;
}

/// Production providers using the Tokio runtime and real TCP.
#[derive(Clone, Default)]
pub struct TokioProviders {
    network: TokioNetworkProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Providers for TokioProviders {
    type Network = TokioNetworkProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}

/// Tokio providers wired to a shared [`MemoryNetworkProvider`].
///
/// Every node of a test gets its own bundle over the same network:
///
/// ```rust,ignore
/// let network = MemoryNetworkProvider::new();
/// let server = MemoryProviders::new(network.clone());
/// let client = MemoryProviders::new(network);
/// ```
#[derive(Clone)]
pub struct MemoryProviders {
    network: MemoryNetworkProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl MemoryProviders {
    /// Create a bundle over the given in-memory network.
    pub fn new(network: MemoryNetworkProvider) -> Self {
        Self {
            network,
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            random: TokioRandomProvider::new(),
        }
    }
}

impl Providers for MemoryProviders {
    type Network = MemoryNetworkProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}
