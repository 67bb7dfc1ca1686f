//! Task spawning for single-threaded execution.

use std::future::Future;

/// Provider for spawning local tasks on the current thread.
///
/// Connection loops, writer tasks and handler invocations are all spawned
/// through this trait. Implementations must run tasks on a `LocalSet`, since
/// none of the RPC state is `Send`.
pub trait TaskProvider: Clone {
    /// Spawn a named task that runs on the current thread.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Tokio task provider using `spawn_local`.
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!("task {} starting", task_name);
            future.await;
            tracing::trace!("task {} completed", task_name);
        })
    }
}
