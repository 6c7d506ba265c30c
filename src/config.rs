use crate::{
    constants::*,
    manager::retry::{ExponentialBackoff, Strategy},
    CryptoMode,
};
use std::time::Duration;

/// Configuration for connection managers and voice sessions.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Config {
    /// Configures the maximum amount of time a connection attempt may take
    /// before being signalled as ready via [`ConnectionManager::complete`].
    ///
    /// Attempts still handshaking when this elapses fail with
    /// [`Error::TimedOut`], and are retried.
    ///
    /// Defaults to 30 seconds.
    ///
    /// [`ConnectionManager::complete`]: crate::ConnectionManager::complete
    /// [`Error::TimedOut`]: crate::manager::Error::TimedOut
    pub connection_timeout: Duration,

    /// Strategy used to determine how long to wait between reconnection attempts.
    ///
    /// *Defaults to an [`ExponentialBackoff`] from 1s to 60s, with a
    /// jitter of +/-250ms.*
    pub retry: Strategy,

    /// Selected tagging mode for voice packet encryption, announced
    /// to the voice server when selecting a protocol.
    ///
    /// Defaults to [`CryptoMode::Normal`].
    pub crypto_mode: CryptoMode,

    /// Delay between UDP keepalive datagrams on a voice session.
    ///
    /// Defaults to 5 seconds.
    pub keepalive_interval: Duration,

    /// Version of the voice gateway requested when connecting.
    ///
    /// Defaults to [`VOICE_GATEWAY_VERSION`].
    pub gateway_version: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            retry: Strategy::Backoff(ExponentialBackoff::default()),
            crypto_mode: CryptoMode::Normal,
            keepalive_interval: UDP_KEEPALIVE_GAP,
            gateway_version: VOICE_GATEWAY_VERSION,
        }
    }
}

impl Config {
    /// Sets this `Config`'s timeout for a connection attempt to become ready.
    #[must_use]
    pub fn connection_timeout(mut self, connection_timeout: Duration) -> Self {
        self.connection_timeout = connection_timeout;
        self
    }

    /// Sets this `Config`'s reconnection delay strategy.
    #[must_use]
    pub fn retry(mut self, retry: Strategy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets this `Config`'s chosen cryptographic tagging scheme.
    #[must_use]
    pub fn crypto_mode(mut self, crypto_mode: CryptoMode) -> Self {
        self.crypto_mode = crypto_mode;
        self
    }

    /// Sets this `Config`'s gap between UDP keepalives.
    #[must_use]
    pub fn keepalive_interval(mut self, keepalive_interval: Duration) -> Self {
        self.keepalive_interval = keepalive_interval;
        self
    }

    /// Sets this `Config`'s requested voice gateway version.
    #[must_use]
    pub fn gateway_version(mut self, gateway_version: u8) -> Self {
        self.gateway_version = gateway_version;
        self
    }
}
