//! Delays between failed long polls.
//!
//! - **Timeout**: the poll expired. Reconnect after a short random pause
//!   (500-1000 ms) so restarted connectors do not reconnect in lockstep.
//! - **Anything else**: back off 10 seconds plus up to 1 second of jitter.

use std::time::Duration;

use rand::Rng;

use crate::remote::RemoteError;

const DEFAULT_TIMEOUT_MIN_MS: u64 = 500;
const DEFAULT_TIMEOUT_MAX_MS: u64 = 1000;
const DEFAULT_ERROR_BASE_SECS: u64 = 10;
const DEFAULT_ERROR_JITTER_MS: u64 = 1000;

/// Backoff policy for the fetch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBackoff {
    pub timeout_min: Duration,
    pub timeout_max: Duration,
    pub error_base: Duration,
    pub error_jitter: Duration,
}

impl Default for FetchBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchBackoff {
    pub fn new() -> Self {
        FetchBackoff {
            timeout_min: Duration::from_millis(DEFAULT_TIMEOUT_MIN_MS),
            timeout_max: Duration::from_millis(DEFAULT_TIMEOUT_MAX_MS),
            error_base: Duration::from_secs(DEFAULT_ERROR_BASE_SECS),
            error_jitter: Duration::from_millis(DEFAULT_ERROR_JITTER_MS),
        }
    }

    /// The delay before the next poll after `error`.
    pub fn delay_for(&self, error: &RemoteError) -> Duration {
        if error.is_timeout() {
            self.timeout_delay()
        } else {
            self.error_delay()
        }
    }

    pub fn timeout_delay(&self) -> Duration {
        let min = self.timeout_min.as_millis() as u64;
        let max = (self.timeout_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    pub fn error_delay(&self) -> Duration {
        let jitter = rand::rng().random_range(0..=self.error_jitter.as_millis() as u64);
        self.error_base + Duration::from_millis(jitter)
    }
}
