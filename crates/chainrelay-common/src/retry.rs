//! Fixed-point exponential backoff, ported from the teacher's
//! `retry`/`retry::policies` modules. Kept dependency-free (no float math)
//! by expressing the multiplier as a ratio.

use std::time::Duration;

use tracing::{error, warn};

pub trait Backoff {
    /// Base delay in ms.
    fn base_delay_ms(&self) -> u64;

    /// Generates next delay given current delay.
    fn next_delay_ms(&self, curr_delay_ms: u64) -> u64;
}

/// Exponential backoff expressed as a `multiplier / multiplier_base` ratio,
/// e.g. `multiplier = 15, multiplier_base = 10` is a 1.5x backoff.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    multiplier: u64,
    multiplier_base: u64,
}

impl ExponentialBackoff {
    pub fn new(base_delay_ms: u64, multiplier: u64, multiplier_base: u64) -> Self {
        assert!(multiplier_base != 0);
        Self {
            base_delay_ms,
            multiplier,
            multiplier_base,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 1500,
            multiplier: 15,
            multiplier_base: 10,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    fn next_delay_ms(&self, curr_delay_ms: u64) -> u64 {
        curr_delay_ms * self.multiplier / self.multiplier_base
    }
}

/// Runs a fallible async operation with a backoff retry, up to `max_retries`
/// additional attempts beyond the first.
pub async fn retry_with_backoff_async<R, E, F, Fut>(
    name: &str,
    max_retries: u16,
    backoff: &impl Backoff,
    mut operation: F,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
    E: std::fmt::Debug,
{
    let mut delay = backoff.base_delay_ms();

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries => {
                warn!(
                    attempt = attempt + 1,
                    ?err,
                    name,
                    delay_ms = delay,
                    "retrying after failure"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = backoff.next_delay_ms(delay);
            }
            Err(err) => {
                error!(name, "max retries exceeded, returning last error");
                return Err(err);
            }
        }
    }

    unreachable!()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_until_success() {
        let backoff = ExponentialBackoff::new(1, 2, 1);
        let attempts = AtomicU32::new(0);
        let result: Result<&str, &str> = retry_with_backoff_async("op", 3, &backoff, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("not yet")
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let backoff = ExponentialBackoff::new(1, 2, 1);
        let attempts = AtomicU32::new(0);
        let result: Result<&str, &str> = retry_with_backoff_async("op", 2, &backoff, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("always fails")
        })
        .await;
        assert_eq!(result, Err("always fails"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
