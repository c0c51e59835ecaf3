//! Retry-on-conflict for read-modify-write sequences

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::controller::error::Result;

/// Bounded exponential backoff between conflicting writes
#[derive(Clone, Debug)]
pub struct RetryBackoff {
    /// Total number of attempts
    pub steps: u32,
    /// Delay after the first conflict
    pub duration: Duration,
    /// Multiplier applied after each conflict
    pub factor: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            steps: 4,
            duration: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
        }
    }
}

impl RetryBackoff {
    /// Delay before attempt `attempt + 1`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.duration.as_secs_f64() * self.factor.powi(attempt as i32);
        let jitter = base * self.jitter * rand::random::<f64>();
        Duration::from_secs_f64(base + jitter)
    }
}

/// Run `f` until it succeeds, fails with something other than a conflict,
/// or the backoff is exhausted.
///
/// `f` must re-read the object it modifies on every call, otherwise a
/// retry resubmits the same stale resourceVersion.
pub async fn retry_on_conflict<T, F, Fut>(backoff: &RetryBackoff, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Err(e) if e.is_conflict() && attempt + 1 < backoff.steps => {
                let delay = backoff.delay_for_attempt(attempt);
                debug!(
                    "Conflict on attempt {}, retrying in {:?}: {}",
                    attempt + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
