//! Voice gateway transports, and the session which drives them.
//!
//! A [`VoiceConnectionClient`] exposes each step of the voice handshake
//! (identify, IP discovery, protocol selection, heartbeats, and keepalives)
//! over a pair of pluggable [`transport`] sockets. A [`VoiceSession`] performs
//! that handshake on every attempt of a [`ConnectionManager`], so that the
//! session survives dropped connections.
//!
//! [`ConnectionManager`]: crate::ConnectionManager

mod client;
pub(crate) mod codec;
mod error;
mod session;
#[cfg(test)]
pub(crate) mod test_impls;
pub mod transport;

pub use self::{
    client::VoiceConnectionClient,
    error::{Error, Result},
    session::VoiceSession,
};
