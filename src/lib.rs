#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Siskin is an async library for keeping Discord gateway sessions alive, and
//! for driving the transports of a Discord voice call.
//!
//! The library offers:
//!  * A [`ConnectionManager`], which repeatedly drives any caller-supplied
//!  [`Connector`] through connect attempts, with exponential backoff between
//!  failures and a watchdog over slow handshakes. Closures which invalidate a
//!  session end the reconnect loop, while all others are retried.
//!  * A [`VoiceConnectionClient`], exposing each step of the voice gateway
//!  handshake over a websocket and a UDP socket. Both sockets sit behind
//!  [traits], so that other stacks or test doubles may be swapped in.
//!  * A [`VoiceSession`], combining the two: a voice connection which
//!  performs the full handshake, heartbeats, and keepalives on each attempt.
//!
//! ## Example
//! ```rust,no_run
//! use siskin::{id::{GuildId, UserId}, Config, ConnectionInfo, VoiceSession};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let info = ConnectionInfo {
//!     endpoint: "example.discord.media:80".into(),
//!     guild_id: GuildId(41771983423143937),
//!     session_id: "my_session_id".into(),
//!     token: "my_token".into(),
//!     user_id: UserId(104694319306248192),
//! };
//!
//! let session = VoiceSession::new(info, Config::default());
//! session.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [traits]: voice::transport

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    // TODO: would require significant rewriting of all existing docs
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
mod crypto;
pub mod error;
pub mod events;
pub mod id;
mod info;
pub mod manager;
pub mod model;
mod state;
mod udp;
pub mod voice;
mod ws;

pub use discortp as packet;

pub use crate::{
    config::Config,
    crypto::CryptoMode,
    info::ConnectionInfo,
    manager::{ConnectionManager, Connector},
    state::ConnectionState,
    udp::UdpTransport,
    voice::{VoiceConnectionClient, VoiceSession},
    ws::WsTransport,
};
