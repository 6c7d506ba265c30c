//! Socket abstractions beneath a [`VoiceConnectionClient`].
//!
//! The client only ever talks to these traits, so that alternative websocket
//! or datagram stacks (or test doubles) may be swapped in.
//!
//! [`VoiceConnectionClient`]: super::VoiceConnectionClient

use crate::{error::BoxError, manager::close::TransportClosed};
use async_trait::async_trait;
use flume::Sender;
use std::{error::Error as StdError, fmt, io::Error as IoError, net::SocketAddr};
use tokio_tungstenite::tungstenite::error::Error as TungsteniteError;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A single websocket message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SocketMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

/// Inbound activity on a [`MessageSocket`].
#[derive(Clone, Debug, PartialEq)]
pub enum SocketEvent {
    /// A message arrived.
    Message(SocketMessage),
    /// The socket closed without being asked to.
    Closed(Option<TransportClosed>),
}

/// Framed, bidirectional message transport such as a websocket.
#[async_trait]
pub trait MessageSocket: Send {
    /// Sets the token which aborts any in-flight operation of this socket.
    fn set_cancel_token(&mut self, token: CancellationToken);

    /// Opens a connection to `url`.
    ///
    /// Inbound messages, and at most one closure, are pushed to `inbound`
    /// until [`disconnect`] is called.
    ///
    /// [`disconnect`]: MessageSocket::disconnect
    async fn connect(&mut self, url: Url, inbound: Sender<SocketEvent>) -> Result<()>;

    /// Sends one message.
    async fn send(&mut self, message: SocketMessage) -> Result<()>;

    /// Closes the connection, if any. Calling this when closed does nothing.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Unreliable datagram transport such as a UDP socket.
#[async_trait]
pub trait DatagramSocket: Send {
    /// Sets the token which aborts any in-flight operation of this socket.
    fn set_cancel_token(&mut self, token: CancellationToken);

    /// Sets the remote address used by [`send`].
    ///
    /// [`send`]: DatagramSocket::send
    fn set_destination(&mut self, addr: SocketAddr);

    /// Returns the local port this socket is bound to, once started.
    fn port(&self) -> Option<u16>;

    /// Binds the socket, forwarding every received datagram to `inbound`.
    async fn start(&mut self, inbound: Sender<Vec<u8>>) -> Result<()>;

    /// Sends one datagram to the current destination.
    async fn send(&mut self, datagram: &[u8]) -> Result<()>;

    /// Unbinds the socket. Calling this when stopped does nothing.
    async fn stop(&mut self) -> Result<()>;
}

/// Errors encountered by a socket implementation.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The underlying socket failed.
    Io(IoError),
    /// The websocket library failed.
    Ws(TungsteniteError),
    /// An operation needed an open socket.
    NotConnected,
    /// A datagram was sent before any destination was set.
    NoDestination,
    /// An error from a third-party socket implementation.
    Custom(BoxError),
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Self {
        Error::Ws(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket failure: ")?;
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Ws(e) => e.fmt(f),
            Self::NotConnected => write!(f, "socket is not connected"),
            Self::NoDestination => write!(f, "no datagram destination was set"),
            Self::Custom(e) => e.fmt(f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => e.source(),
            Error::Ws(e) => e.source(),
            Error::NotConnected | Error::NoDestination => None,
            Error::Custom(e) => Some(&**e),
        }
    }
}

/// Convenience type for socket error handling.
pub type Result<T> = std::result::Result<T, Error>;
