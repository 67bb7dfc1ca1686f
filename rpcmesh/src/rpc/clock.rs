//! Coarse deadline clock.
//!
//! Computing `now + timeout` on every call is replaced by a sample refreshed
//! every 100 ms by a background task, so a deadline may be up to one
//! refresh period early.

use std::cell::Cell;
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct CoarseClock {
    timeout: Duration,
    deadline: Cell<Duration>,
}

impl CoarseClock {
    pub(crate) fn new(now: Duration, timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Cell::new(now + timeout),
        }
    }

    pub(crate) fn refresh(&self, now: Duration) {
        self.deadline.set(now + self.timeout);
    }

    /// Deadline of a request issued now.
    pub(crate) fn deadline(&self) -> Duration {
        self.deadline.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_follows_refresh() {
        let clock = CoarseClock::new(Duration::ZERO, Duration::from_secs(10));
        assert_eq!(clock.deadline(), Duration::from_secs(10));

        clock.refresh(Duration::from_millis(2_300));
        assert_eq!(clock.deadline(), Duration::from_millis(12_300));
    }
}
