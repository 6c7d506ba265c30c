//! Classification of transport closures into fatal and recoverable failures.

use std::{error::Error as StdError, fmt};

/// The signal raised by a transport which closed without being asked to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportClosed {
    /// Numeric close code given by the remote host, if any.
    pub code: Option<u16>,
    /// Human-readable cause of the closure.
    pub reason: String,
}

impl TransportClosed {
    /// Describes a closure carrying a close code.
    pub fn with_code(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Describes a closure caused by a local or network failure.
    pub fn without_code(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    /// Returns the fatal reason encoded by this closure's code, if any.
    #[must_use]
    pub fn fatal_reason(&self) -> Option<FatalReason> {
        self.code.and_then(FatalReason::from_close_code)
    }
}

impl fmt::Display for TransportClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "transport closed with code {code}")?,
            None => write!(f, "transport closed")?,
        }

        if self.reason.is_empty() {
            Ok(())
        } else {
            write!(f, ": {}", self.reason)
        }
    }
}

impl StdError for TransportClosed {}

/// Close causes which no amount of retrying can recover from.
///
/// On seeing one of these, a [`ConnectionManager`] stops reconnecting:
/// the owner must begin an entirely new session.
///
/// [`ConnectionManager`]: crate::ConnectionManager
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum FatalReason {
    /// The session is no longer valid, and cannot be resumed.
    SessionExpired,
    /// The remote host closed the connection for good, e.g., because
    /// the channel was deleted or the client was kicked.
    ForciblyClosed,
}

impl FatalReason {
    /// Close code sent alongside an invalidated session.
    pub const SESSION_EXPIRED_CODE: u16 = 4006;

    /// Close code sent when the remote host will not accept a reconnect.
    pub const FORCIBLY_CLOSED_CODE: u16 = 4014;

    /// Maps a close code onto a fatal reason, returning `None` for
    /// recoverable codes.
    #[must_use]
    pub fn from_close_code(code: u16) -> Option<Self> {
        match code {
            Self::SESSION_EXPIRED_CODE => Some(Self::SessionExpired),
            Self::FORCIBLY_CLOSED_CODE => Some(Self::ForciblyClosed),
            _ => None,
        }
    }

    /// Returns the close code which signals this reason.
    #[must_use]
    pub fn close_code(self) -> u16 {
        match self {
            Self::SessionExpired => Self::SESSION_EXPIRED_CODE,
            Self::ForciblyClosed => Self::FORCIBLY_CLOSED_CODE,
        }
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionExpired => write!(f, "session expired"),
            Self::ForciblyClosed => write!(f, "connection was closed"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_two_codes_are_fatal() {
        assert_eq!(
            FatalReason::from_close_code(4006),
            Some(FatalReason::SessionExpired)
        );
        assert_eq!(
            FatalReason::from_close_code(4014),
            Some(FatalReason::ForciblyClosed)
        );

        for code in [1000, 1001, 1006, 4000, 4009, 4015] {
            assert_eq!(FatalReason::from_close_code(code), None);
        }
    }

    #[test]
    fn codeless_closures_are_recoverable() {
        assert_eq!(TransportClosed::without_code("reset").fatal_reason(), None);
        assert_eq!(
            TransportClosed::with_code(4014, "kicked").fatal_reason(),
            Some(FatalReason::ForciblyClosed)
        );
    }
}
