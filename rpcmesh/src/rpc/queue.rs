//! Per-target outbound queues for peers without a live connection.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::pending::PendingRequest;
use crate::config::QUEUE_OVERFLOW_DROP;

/// An encoded frame waiting for its target to become reachable.
pub(crate) struct QueuedFrame {
    pub(crate) frame: Vec<u8>,
    pub(crate) pending: Option<PendingRequest>,
    pub(crate) deadline: Duration,
}

#[derive(Default)]
pub(crate) struct OutboundQueues {
    queues: HashMap<String, VecDeque<QueuedFrame>>,
}

impl OutboundQueues {
    /// Append to the queue of `target`. When the queue grows past `cap`, the
    /// oldest entries (up to [`QUEUE_OVERFLOW_DROP`]) are removed and returned.
    pub(crate) fn push(&mut self, target: &str, entry: QueuedFrame, cap: usize) -> Vec<QueuedFrame> {
        let queue = self.queues.entry(target.to_string()).or_default();
        queue.push_back(entry);
        if queue.len() <= cap {
            return Vec::new();
        }
        let drop = QUEUE_OVERFLOW_DROP.min(queue.len() - 1).max(queue.len() - cap);
        queue.drain(..drop).collect()
    }

    /// Take the whole queue of `target`, oldest first.
    pub(crate) fn take(&mut self, target: &str) -> VecDeque<QueuedFrame> {
        self.queues.remove(target).unwrap_or_default()
    }

    /// Remove every entry whose deadline is not after `now`.
    pub(crate) fn drain_expired(&mut self, now: Duration) -> Vec<QueuedFrame> {
        let mut expired = Vec::new();
        self.queues.retain(|_, queue| {
            let (due, keep): (VecDeque<_>, VecDeque<_>) =
                std::mem::take(queue).into_iter().partition(|e| e.deadline <= now);
            expired.extend(due);
            *queue = keep;
            !queue.is_empty()
        });
        expired
    }

    /// Remove every entry of every target.
    pub(crate) fn drain_all(&mut self) -> Vec<QueuedFrame> {
        self.queues.drain().flat_map(|(_, queue)| queue).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self, target: &str) -> usize {
        self.queues.get(target).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u8, deadline_secs: u64) -> QueuedFrame {
        QueuedFrame {
            frame: vec![tag],
            pending: None,
            deadline: Duration::from_secs(deadline_secs),
        }
    }

    #[test]
    fn test_fifo_take() {
        let mut queues = OutboundQueues::default();
        for tag in 0..3 {
            assert!(queues.push("a", entry(tag, 10), 100).is_empty());
        }
        let frames: Vec<_> = queues.take("a").into_iter().map(|e| e.frame[0]).collect();
        assert_eq!(frames, vec![0, 1, 2]);
        assert_eq!(queues.len("a"), 0);
    }

    #[test]
    fn test_overflow_drops_oldest_batch() {
        let mut queues = OutboundQueues::default();
        for tag in 0..50 {
            assert!(queues.push("a", entry(tag, 10), 50).is_empty());
        }
        let dropped = queues.push("a", entry(50, 10), 50);
        let dropped: Vec<_> = dropped.iter().map(|e| e.frame[0]).collect();
        assert_eq!(dropped, (0..20).collect::<Vec<_>>());
        assert_eq!(queues.len("a"), 31);
        assert_eq!(queues.take("a").front().map(|e| e.frame[0]), Some(20));
    }

    #[test]
    fn test_overflow_keeps_newest_with_small_cap() {
        let mut queues = OutboundQueues::default();
        queues.push("a", entry(0, 10), 2);
        queues.push("a", entry(1, 10), 2);
        let dropped = queues.push("a", entry(2, 10), 2);
        assert_eq!(dropped.len(), 2);
        let left: Vec<_> = queues.take("a").into_iter().map(|e| e.frame[0]).collect();
        assert_eq!(left, vec![2]);
    }

    #[test]
    fn test_drain_expired_across_targets() {
        let mut queues = OutboundQueues::default();
        queues.push("a", entry(0, 5), 10);
        queues.push("a", entry(1, 9), 10);
        queues.push("b", entry(2, 5), 10);

        let expired = queues.drain_expired(Duration::from_secs(5));
        assert_eq!(expired.len(), 2);
        assert_eq!(queues.len("a"), 1);
        assert_eq!(queues.len("b"), 0);
    }

    #[test]
    fn test_drain_all_takes_every_target() {
        let mut queues = OutboundQueues::default();
        queues.push("a", entry(0, 5), 10);
        queues.push("a", entry(1, 9), 10);
        queues.push("b", entry(2, 60), 10);

        assert_eq!(queues.drain_all().len(), 3);
        assert_eq!(queues.len("a"), 0);
        assert_eq!(queues.len("b"), 0);
    }
}
