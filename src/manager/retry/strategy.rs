use crate::constants::*;
use rand::{thread_rng, Rng};
use std::time::Duration;

/// Logic used to determine how long to wait between reconnection attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Strategy {
    /// The manager will wait for the same amount of time between each attempt.
    Every(Duration),
    /// Exponential backoff waiting strategy, where the duration between
    /// attempts (approximately) doubles each time.
    Backoff(ExponentialBackoff),
}

impl Strategy {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        match self {
            Self::Every(t) => *t,
            Self::Backoff(exp) => exp.retry_in(last_wait),
        }
    }
}

/// Exponential backoff waiting strategy.
///
/// The first wait after a success is `min`. Each later wait is twice the
/// last delay plus/minus a uniform random jitter, clamped to `min` and `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// Minimum amount of time to wait between attempts.
    ///
    /// *Defaults to 1s.*
    pub min: Duration,
    /// Maximum amount of time to wait between attempts.
    ///
    /// This will be clamped to `>=` min.
    ///
    /// *Defaults to 60s.*
    pub max: Duration,
    /// Largest absolute amount of jitter added to each doubled delay.
    ///
    /// *Defaults to 250ms.*
    pub jitter: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(RECONNECT_DELAY_MIN_MS),
            max: Duration::from_millis(RECONNECT_DELAY_MAX_MS),
            jitter: Duration::from_millis(RECONNECT_JITTER_MS),
        }
    }
}

impl ExponentialBackoff {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        let target_time = match last_wait {
            None => self.min,
            Some(t) => {
                let doubled = t.saturating_mul(2).as_millis() as i64;
                let jitter = self.jitter.as_millis() as i64;
                let perturb = thread_rng().gen_range(-jitter..=jitter);

                Duration::from_millis(doubled.saturating_add(perturb).max(0) as u64)
            },
        };

        // Now clamp target time into given range.
        let safe_max = if self.max < self.min {
            self.min
        } else {
            self.max
        };

        target_time.clamp(self.min, safe_max)
    }
}
