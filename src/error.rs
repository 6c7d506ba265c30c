//! Session and voice transport error handling.

use std::error::Error as StdError;

/// A type-erased error, as returned by caller-supplied handlers and connectors.
pub type BoxError = Box<dyn StdError + Send + Sync>;

pub use crate::{
    events::AggregateError,
    manager::{
        close::{FatalReason, TransportClosed},
        Error as ConnectionError,
        Result as ConnectionResult,
    },
    voice::{
        transport::Error as TransportError,
        Error as VoiceError,
        Result as VoiceResult,
    },
};
