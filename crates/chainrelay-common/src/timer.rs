//! Self-tuning tick timer shared by the PullLoader and BatchIterator: an
//! interval that doubles on idle ticks (monitoring/backoff cadence) and
//! resets to its floor on a productive tick (fast-follow). Built on the
//! same fixed-point-ratio idea as [`crate::retry::ExponentialBackoff`], but
//! with no retry-count ceiling -- it just oscillates between `min` and
//! `max` for as long as the owning loop runs.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ExponentialTimer {
    min: Duration,
    max: Duration,
    multiplier: u64,
    multiplier_base: u64,
    current: Duration,
}

impl ExponentialTimer {
    pub fn new(min: Duration, max: Duration, multiplier: u64, multiplier_base: u64) -> Self {
        assert!(multiplier_base != 0);
        assert!(min <= max);
        Self {
            min,
            max,
            multiplier,
            multiplier_base,
            current: min,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Waits out the current interval, then returns it.
    pub async fn wait(&self) -> Duration {
        tokio::time::sleep(self.current).await;
        self.current
    }

    /// Fast-follow: collapse back to the floor interval after a productive
    /// tick.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Monitoring cadence: double the interval, capped at `max`.
    pub fn backoff(&mut self) {
        let doubled_ms = self.current.as_millis() as u64 * self.multiplier / self.multiplier_base;
        let next = Duration::from_millis(doubled_ms);
        self.current = next.min(self.max).max(self.min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut t = ExponentialTimer::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            2,
            1,
        );
        assert_eq!(t.current(), Duration::from_secs(1));
        t.backoff();
        assert_eq!(t.current(), Duration::from_secs(2));
        t.backoff();
        assert_eq!(t.current(), Duration::from_secs(4));
        for _ in 0..10 {
            t.backoff();
        }
        assert_eq!(t.current(), Duration::from_secs(30));
    }

    #[test]
    fn reset_collapses_to_floor() {
        let mut t = ExponentialTimer::new(Duration::from_secs(1), Duration::from_secs(30), 2, 1);
        t.backoff();
        t.backoff();
        assert!(t.current() > Duration::from_secs(1));
        t.reset();
        assert_eq!(t.current(), Duration::from_secs(1));
    }
}
