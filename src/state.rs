use std::fmt;

/// Connection status of a gateway session or voice transport pair.
///
/// Each session is in exactly one of these states at a time, and only
/// the owning [`ConnectionManager`] or [`VoiceConnectionClient`] may
/// move it between them.
///
/// [`ConnectionManager`]: crate::ConnectionManager
/// [`VoiceConnectionClient`]: crate::VoiceConnectionClient
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ConnectionState {
    /// No connection is open, and none is being attempted.
    ///
    /// A manager also sits in this state while waiting out a reconnection delay.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The connection is established and ready.
    Connected,
    /// The connection is being torn down.
    Disconnecting,
}

impl ConnectionState {
    /// Returns whether this state is [`Connected`](Self::Connected).
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };

        f.write_str(name)
    }
}
