//! Tick-driven waits
//!
//! Every suspension point in the join protocol is measured by accumulating the
//! host's per-tick delta time, so waits stay correct when the tick rate varies.

use std::time::Duration;

/// Accumulates tick time against a fixed limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimer {
    elapsed: Duration,
    limit: Duration,
}

impl WaitTimer {
    pub fn new(limit: Duration) -> Self {
        Self {
            elapsed: Duration::ZERO,
            limit,
        }
    }

    /// Add one tick of time. Returns true once the limit has been reached.
    pub fn advance(&mut self, dt: Duration) -> bool {
        self.elapsed = self.elapsed.saturating_add(dt);
        self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed >= self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_expires_after_limit() {
        let mut timer = WaitTimer::new(Duration::from_millis(100));

        assert!(!timer.advance(Duration::from_millis(40)));
        assert!(!timer.advance(Duration::from_millis(40)));
        assert_eq!(timer.remaining(), Duration::from_millis(20));
        assert!(timer.advance(Duration::from_millis(40)));
        assert!(timer.is_expired());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_zero_limit_expires_immediately() {
        let mut timer = WaitTimer::new(Duration::ZERO);
        assert!(timer.is_expired());
        assert!(timer.advance(Duration::ZERO));
    }

    #[test]
    fn test_uneven_ticks() {
        let mut timer = WaitTimer::new(Duration::from_secs(1));
        for _ in 0..9 {
            assert!(!timer.advance(Duration::from_millis(100)));
        }
        assert!(timer.advance(Duration::from_millis(250)));
        assert_eq!(timer.elapsed(), Duration::from_millis(1150));
    }
}
