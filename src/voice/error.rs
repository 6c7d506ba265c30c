//! Voice handshake and transport errors.

use super::transport::Error as TransportError;
use crate::events::AggregateError;
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt};

/// Errors encountered while connecting to, or talking with, a voice server.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The voice server chose an encryption scheme other than the one requested.
    CryptoModeInvalid,
    /// The voice server does not offer the requested encryption scheme.
    CryptoModeUnavailable,
    /// An invalid voice gateway URL was built from the session's endpoint.
    EndpointUrl,
    /// IP discovery returned a malformed response.
    IllegalDiscoveryResponse,
    /// IP discovery returned an address which could not be parsed.
    IllegalIp,
    /// A control frame could not be decoded.
    MalformedFrame,
    /// The previous heartbeat was never acknowledged.
    HeartbeatMissed,
    /// The voice server asked for a heartbeat interval which cannot be timed.
    IllegalHeartbeatInterval,
    /// One or more event handlers failed.
    Handlers(AggregateError),
    /// JSON (de)serialization error.
    Json(JsonError),
    /// Failure in an underlying socket.
    Transport(TransportError),
}

impl From<AggregateError> for Error {
    fn from(e: AggregateError) -> Self {
        Error::Handlers(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Self {
        Error::Json(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice connection error: ")?;
        match self {
            Self::CryptoModeInvalid => write!(f, "server changed negotiated encryption mode"),
            Self::CryptoModeUnavailable => write!(f, "server does not support negotiated encryption mode"),
            Self::EndpointUrl => write!(f, "endpoint URL received from gateway was invalid"),
            Self::IllegalDiscoveryResponse => write!(f, "IP discovery/NAT punching response was invalid"),
            Self::IllegalIp => write!(f, "IP discovery/NAT punching response had bad IP value"),
            Self::MalformedFrame => write!(f, "control frame could not be decoded"),
            Self::HeartbeatMissed => write!(f, "server did not acknowledge the last heartbeat"),
            Self::IllegalHeartbeatInterval => write!(f, "server sent an invalid heartbeat interval"),
            Self::Handlers(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::Transport(e) => e.fmt(f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::CryptoModeInvalid
            | Error::CryptoModeUnavailable
            | Error::EndpointUrl
            | Error::IllegalDiscoveryResponse
            | Error::IllegalIp
            | Error::MalformedFrame
            | Error::HeartbeatMissed
            | Error::IllegalHeartbeatInterval => None,
            Error::Handlers(e) => Some(e),
            Error::Json(e) => e.source(),
            Error::Transport(e) => e.source(),
        }
    }
}

/// Convenience type for voice connection error handling.
pub type Result<T> = std::result::Result<T, Error>;
