//! Node configuration.
//!
//! Values are stored the way operators write them (seconds, milliseconds,
//! bytes) and turned into effective durations by the accessor methods, which
//! apply floors and defaults.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Default RPC timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Smallest accepted RPC timeout in seconds; lower values fall back to the default.
pub const MIN_TIMEOUT_SECS: u64 = 5;
/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;
/// Smallest accepted heartbeat interval in seconds; lower values fall back to the default.
pub const MIN_HEARTBEAT_SECS: u64 = 5;
/// Default delay before an initiator reconnects.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 3;
/// Default per-target outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 5000;
/// Smallest send interval that enables batching.
pub const MIN_SEND_INTERVAL_MS: u64 = 10;

/// Time allowed for the register exchange.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);
/// Time an initiator waits for a heartbeat reply.
pub const HEARTBEAT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Width of the heartbeat jitter window.
pub const HEARTBEAT_JITTER: Duration = Duration::from_secs(5);
/// Lower bound of the jittered heartbeat period.
pub const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
/// Refresh period of the coarse deadline clock.
pub const CLOCK_REFRESH: Duration = Duration::from_millis(100);
/// Period of the pending-request timeout sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);
/// How much earlier queued frames expire than in-flight ones.
pub const QUEUE_DEADLINE_BACKDATE: Duration = Duration::from_secs(3);
/// Entries dropped from the head of a full outbound queue.
pub const QUEUE_OVERFLOW_DROP: usize = 20;

/// Send interval policy for outbound batching, in milliseconds.
///
/// Either one value for every connection, or a per-role table with a
/// fallback:
///
/// ```json
/// { "sendInterval": 20 }
/// { "sendInterval": { "default": 0, "roles": { "gate": 50 } } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SendInterval {
    /// Same interval for every connection.
    Global(u64),
    /// Interval chosen by the remote peer's role.
    PerRole {
        /// Interval for roles missing from `roles`.
        #[serde(default)]
        default: u64,
        /// Interval per role.
        #[serde(default)]
        roles: HashMap<String, u64>,
    },
}

impl Default for SendInterval {
    fn default() -> Self {
        SendInterval::Global(0)
    }
}

impl SendInterval {
    /// Batching period for a remote role, `None` when frames go out immediately.
    pub fn for_role(&self, role: &str) -> Option<Duration> {
        let ms = match self {
            SendInterval::Global(ms) => *ms,
            SendInterval::PerRole { default, roles } => {
                roles.get(role).copied().unwrap_or(*default)
            }
        };
        (ms >= MIN_SEND_INTERVAL_MS).then(|| Duration::from_millis(ms))
    }
}

/// Configuration for an [`RpcNode`](crate::RpcNode).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RpcConfig {
    /// RPC timeout in seconds (values below 5 use the default of 10).
    pub timeout_secs: u64,

    /// Maximum frame length after registration, in bytes.
    pub max_frame_len: usize,

    /// Heartbeat interval in seconds (values below 5 use the default of 60).
    pub heartbeat_interval_secs: u64,

    /// Delay before an initiator reconnects, in seconds.
    pub reconnect_delay_secs: u64,

    /// Outbound batching policy.
    pub send_interval: SendInterval,

    /// Buffered bytes that force a batch flush before the timer fires.
    pub flush_threshold: Option<usize>,

    /// Maximum queued frames per unreachable target. `0` disables queuing.
    pub outbound_queue_cap: usize,

    /// Disable Nagle's algorithm on every socket.
    pub no_delay: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_frame_len: crate::wire::MAX_FRAME_LEN,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            send_interval: SendInterval::default(),
            flush_threshold: None,
            outbound_queue_cap: DEFAULT_OUTBOUND_QUEUE_CAP,
            no_delay: true,
        }
    }
}

impl RpcConfig {
    /// Set the RPC timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the maximum frame length.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Set the heartbeat interval in seconds.
    pub fn with_heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    /// Set the reconnect delay in seconds.
    pub fn with_reconnect_delay_secs(mut self, secs: u64) -> Self {
        self.reconnect_delay_secs = secs;
        self
    }

    /// Set the batching policy.
    pub fn with_send_interval(mut self, interval: SendInterval) -> Self {
        self.send_interval = interval;
        self
    }

    /// Set the byte threshold that forces a batch flush.
    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = Some(bytes);
        self
    }

    /// Set the per-target outbound queue capacity.
    pub fn with_outbound_queue_cap(mut self, cap: usize) -> Self {
        self.outbound_queue_cap = cap;
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    /// Effective RPC timeout.
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs >= MIN_TIMEOUT_SECS {
            Duration::from_secs(self.timeout_secs)
        } else {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        }
    }

    /// Effective heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        if self.heartbeat_interval_secs >= MIN_HEARTBEAT_SECS {
            Duration::from_secs(self.heartbeat_interval_secs)
        } else {
            Duration::from_secs(DEFAULT_HEARTBEAT_SECS)
        }
    }

    /// Delay between initiator reconnect attempts.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.max_frame_len, 10 * 1024 * 1024);
        assert_eq!(config.outbound_queue_cap, 5000);
        assert!(config.no_delay);
        assert_eq!(config.send_interval.for_role("any"), None);
    }

    #[test]
    fn test_values_below_floor_use_defaults() {
        let config = RpcConfig::default()
            .with_timeout_secs(2)
            .with_heartbeat_interval_secs(1);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));

        let config = RpcConfig::default()
            .with_timeout_secs(5)
            .with_heartbeat_interval_secs(30);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_send_interval_threshold() {
        assert_eq!(SendInterval::Global(9).for_role("gate"), None);
        assert_eq!(
            SendInterval::Global(10).for_role("gate"),
            Some(Duration::from_millis(10))
        );
    }

    #[test]
    fn test_send_interval_per_role() {
        let interval = SendInterval::PerRole {
            default: 0,
            roles: HashMap::from([("gate".to_string(), 50)]),
        };
        assert_eq!(interval.for_role("gate"), Some(Duration::from_millis(50)));
        assert_eq!(interval.for_role("connector"), None);
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: RpcConfig = serde_json::from_str(
            r#"{
                "timeoutSecs": 20,
                "sendInterval": { "default": 15, "roles": { "gate": 0 } },
                "flushThreshold": 65536,
                "noDelay": false
            }"#,
        )
        .expect("parse config");

        assert_eq!(config.timeout(), Duration::from_secs(20));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.flush_threshold, Some(65536));
        assert!(!config.no_delay);
        assert_eq!(config.send_interval.for_role("gate"), None);
        assert_eq!(
            config.send_interval.for_role("chat"),
            Some(Duration::from_millis(15))
        );
    }

    #[test]
    fn test_deserialize_global_interval() {
        let config: RpcConfig =
            serde_json::from_str(r#"{ "sendInterval": 25 }"#).expect("parse config");
        assert_eq!(config.send_interval, SendInterval::Global(25));
    }
}
