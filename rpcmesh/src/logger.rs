//! Injected logging sink.
//!
//! Lifecycle events the application cares about (peers added, connections
//! rejected or lost) go through a [`Logger`] handed to the node builder.
//! Internal traces use `tracing` directly.

/// Sink for node-level log lines.
pub trait Logger {
    /// Verbose lifecycle detail.
    fn debug(&self, msg: &str);
    /// Normal lifecycle events.
    fn info(&self, msg: &str);
    /// Connection failures and dropped messages.
    fn error(&self, msg: &str);
}

/// Default logger forwarding to `tracing` under the `rpcmesh` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, msg: &str) {
        tracing::debug!(target: "rpcmesh", "{}", msg);
    }

    fn info(&self, msg: &str) {
        tracing::info!(target: "rpcmesh", "{}", msg);
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: "rpcmesh", "{}", msg);
    }
}
