//! Retry and backoff policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling applied to every computed delay.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Per-queue exponential backoff policy.
///
/// The schedule is `delay_n = base * 2^n` where `n` is the number of prior
/// failures, clamped at one hour. Only `base` and `max_attempts` vary per
/// queue; the exponential kind is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum attempts before the job moves to the dead-letter store.
    pub max_attempts: u32,

    /// Base delay in milliseconds.
    pub base_delay_ms: u64,

    /// Add full jitter to delays.
    #[serde(default)]
    pub jitter: bool,
}

impl BackoffPolicy {
    /// Create a policy with the given attempts and base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            jitter: false,
        }
    }

    /// Enable full jitter: delays are drawn uniformly from [0, delay_n].
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Base delay as a Duration.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay before the next attempt, given the number of prior failures.
    pub fn delay_for(&self, prior_failures: u32) -> Duration {
        let exp = prior_failures.min(20);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        let clamped = Duration::from_millis(raw).min(MAX_BACKOFF);

        if self.jitter {
            let millis = clamped.as_millis() as u64;
            Duration::from_millis(rand_below(millis.saturating_add(1)))
        } else {
            clamped
        }
    }

    /// True while attempts remain.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

/// Uniform pseudo-random draw below `bound` using a time-seeded LCG.
fn rand_below(bound: u64) -> u64 {
    use std::time::SystemTime;

    if bound == 0 {
        return 0;
    }

    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    // LCG parameters
    let a: u64 = 6364136223846793005;
    let c: u64 = 1442695040888963407;

    seed.wrapping_mul(a).wrapping_add(c) % bound
}
