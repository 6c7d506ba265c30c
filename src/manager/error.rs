//! Connection lifecycle errors and convenience types.

use super::close::{FatalReason, TransportClosed};
use crate::{error::BoxError, events::AggregateError};
use std::{error::Error as StdError, fmt, sync::Arc};

/// Errors raised while managing a gateway session's connection lifecycle.
///
/// These are cheaply cloneable, as a single failure is handed to both of an
/// attempt's promises as well as every disconnect observer.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The manager was started while a reconnect loop was still active.
    AlreadyRunning,
    /// The attempt was deliberately cancelled, or superseded by a reconnect.
    Cancelled,
    /// The attempt was not signalled as ready within the configured timeout.
    TimedOut,
    /// The transport closed unexpectedly, for a recoverable reason.
    Closed(Option<TransportClosed>),
    /// The transport closed in a way which invalidates the whole session.
    Fatal(FatalReason, TransportClosed),
    /// The caller-supplied connector failed.
    Connector(Arc<dyn StdError + Send + Sync>),
    /// One or more connection observers failed.
    Handlers(Arc<AggregateError>),
}

impl Error {
    /// Wraps a caller-supplied failure.
    ///
    /// Errors which are already an [`Error`] are passed through unchanged.
    pub fn connector(e: impl Into<BoxError>) -> Self {
        match e.into().downcast::<Error>() {
            Ok(e) => *e,
            Err(e) => Self::Connector(Arc::from(e)),
        }
    }

    /// Classifies a transport's "closed unexpectedly" signal.
    #[must_use]
    pub fn from_closure(closed: Option<TransportClosed>) -> Self {
        match closed {
            Some(closed) => match closed.fatal_reason() {
                Some(reason) => Self::Fatal(reason, closed),
                None => Self::Closed(Some(closed)),
            },
            None => Self::Closed(None),
        }
    }

    /// Indicates whether this failure must end the reconnect loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(..))
    }

    /// Indicates whether this failure came from a deliberate cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<AggregateError> for Error {
    fn from(e: AggregateError) -> Self {
        Self::Handlers(Arc::new(e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            AlreadyRunning => write!(f, "cannot start an already running connection"),
            Cancelled => write!(f, "connection attempt was cancelled"),
            TimedOut => write!(f, "connection attempt timed out"),
            Closed(Some(c)) => write!(f, "websocket connection was closed ({c})"),
            Closed(None) => write!(f, "websocket connection was closed"),
            Fatal(reason, c) => write!(f, "websocket {reason} ({c})"),
            Connector(e) => write!(f, "connection handshake failed: {e}"),
            Handlers(e) => e.fmt(f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::AlreadyRunning | Error::Cancelled | Error::TimedOut | Error::Closed(None) =>
                None,
            Error::Closed(Some(c)) | Error::Fatal(_, c) => Some(c),
            Error::Connector(e) => Some(&**e),
            Error::Handlers(e) => Some(&**e),
        }
    }
}

/// Convenience type for connection lifecycle error handling.
pub type Result<T> = std::result::Result<T, Error>;
