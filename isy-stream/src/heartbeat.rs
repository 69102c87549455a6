//! Heartbeat-based liveness tracking.
//!
//! The controller sends a `_0` event periodically; its `action` is the number
//! of seconds until the next one. If that promise is broken the stream is
//! considered lost.

use std::time::{Duration, Instant};

use crate::error::StreamError;

/// Last heartbeat time and the interval the controller announced with it.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatState {
    last: Option<Instant>,
    wait: Duration,
    armed_at: Option<Instant>,
    first_deadline: Option<Duration>,
}

impl HeartbeatState {
    /// Create a heartbeat tracker.
    ///
    /// `first_deadline` bounds the wait for the very first heartbeat after
    /// subscribing. With `None`, elapsed time is zero until a heartbeat has
    /// been seen.
    pub fn new(first_deadline: Option<Duration>) -> Self {
        Self {
            last: None,
            wait: Duration::ZERO,
            armed_at: None,
            first_deadline,
        }
    }

    /// Start the clock for the first-heartbeat deadline. Called on subscribe.
    pub fn arm(&mut self, now: Instant) {
        self.armed_at = Some(now);
    }

    /// Record a heartbeat carrying the seconds until the next one.
    pub fn record(&mut self, now: Instant, wait: Duration) {
        self.last = Some(now);
        self.wait = wait;
    }

    pub fn last(&self) -> Option<Instant> {
        self.last
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Time since the last heartbeat, or zero when none has arrived yet.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        }
    }

    /// Check whether the controller missed its heartbeat.
    pub fn check(&self, now: Instant) -> Result<(), StreamError> {
        match (self.last, self.armed_at, self.first_deadline) {
            (Some(_), _, _) => {
                let elapsed = self.elapsed(now);
                if expired(elapsed, self.wait) {
                    return Err(StreamError::HeartbeatTimeout {
                        elapsed,
                        wait: self.wait,
                    });
                }
                Ok(())
            }
            (None, Some(armed_at), Some(deadline)) => {
                let elapsed = now.saturating_duration_since(armed_at);
                if expired(elapsed, deadline) {
                    return Err(StreamError::HeartbeatTimeout {
                        elapsed,
                        wait: deadline,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Compared in whole seconds, so up to a second of jitter past the
/// announced wait is tolerated.
fn expired(elapsed: Duration, limit: Duration) -> bool {
    elapsed.as_secs() > limit.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_heartbeat_never_expires_without_deadline() {
        let mut state = HeartbeatState::new(None);
        let start = Instant::now();
        state.arm(start);

        assert_eq!(state.elapsed(start + Duration::from_secs(3600)), Duration::ZERO);
        assert!(state.check(start + Duration::from_secs(3600)).is_ok());
    }

    #[test]
    fn test_first_heartbeat_deadline() {
        let mut state = HeartbeatState::new(Some(Duration::from_secs(30)));
        let start = Instant::now();

        // Not armed yet: nothing to measure against
        assert!(state.check(start + Duration::from_secs(60)).is_ok());

        state.arm(start);
        assert!(state.check(start + Duration::from_secs(30)).is_ok());
        assert!(state.check(start + Duration::from_millis(30_500)).is_ok());
        assert!(matches!(
            state.check(start + Duration::from_secs(31)),
            Err(StreamError::HeartbeatTimeout { .. })
        ));
    }

    #[test]
    fn test_recorded_heartbeat_uses_announced_wait() {
        let mut state = HeartbeatState::new(Some(Duration::from_secs(5)));
        let start = Instant::now();
        state.arm(start);
        state.record(start, Duration::from_secs(120));

        assert_eq!(state.wait(), Duration::from_secs(120));
        assert_eq!(state.last(), Some(start));
        assert!(state.check(start + Duration::from_secs(120)).is_ok());

        match state.check(start + Duration::from_secs(121)) {
            Err(StreamError::HeartbeatTimeout { elapsed, wait }) => {
                assert_eq!(elapsed, Duration::from_secs(121));
                assert_eq!(wait, Duration::from_secs(120));
            }
            other => panic!("Expected HeartbeatTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_sub_second_jitter_tolerated() {
        let mut state = HeartbeatState::new(None);
        let start = Instant::now();
        state.record(start, Duration::from_secs(120));

        assert!(state.check(start + Duration::from_millis(120_500)).is_ok());
        assert!(state.check(start + Duration::from_millis(120_999)).is_ok());
        assert!(state.check(start + Duration::from_millis(121_000)).is_err());
    }

    #[test]
    fn test_new_heartbeat_resets_clock() {
        let mut state = HeartbeatState::new(None);
        let start = Instant::now();
        state.record(start, Duration::from_secs(10));
        state.record(start + Duration::from_secs(9), Duration::from_secs(10));

        assert!(state.check(start + Duration::from_secs(15)).is_ok());
    }
}
