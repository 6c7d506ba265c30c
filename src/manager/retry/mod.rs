//! Configuration for reconnection delays.

mod strategy;

pub use self::strategy::*;

use std::time::Duration;

/// Tracks the delay sequence of one reconnect loop.
///
/// The delay resets to the strategy's floor after every successful
/// connection.
#[derive(Debug)]
pub(crate) struct Backoff {
    strategy: Strategy,
    last_wait: Option<Duration>,
}

impl Backoff {
    pub(crate) fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            last_wait: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.last_wait = None;
    }

    /// Returns the delay to wait out now, and advances the sequence.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let wait = self.strategy.retry_in(self.last_wait);
        self.last_wait = Some(wait);
        wait
    }
}
