//! Voice gateway opcodes, payloads, and close codes.

use crate::id::{GuildId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, net::IpAddr};

/// Opcodes of voice gateway control frames.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum OpCode {
    /// Begin a voice session.
    Identify = 0,
    /// Choose the transport protocol and encryption mode.
    SelectProtocol = 1,
    /// The voice server's SSRC, address, and supported modes.
    Ready = 2,
    /// Keep the websocket alive.
    Heartbeat = 3,
    /// The session's encryption key and chosen mode.
    SessionDescription = 4,
    /// A user began or stopped speaking.
    Speaking = 5,
    /// Acknowledgement of a heartbeat.
    HeartbeatAck = 6,
    /// Resume a previous session.
    Resume = 7,
    /// The interval at which to send heartbeats.
    Hello = 8,
    /// Acknowledgement of a resumed session.
    Resumed = 9,
    /// A user left the voice channel.
    ClientDisconnect = 13,
}

impl OpCode {
    /// Maps a raw opcode onto a known value.
    #[must_use]
    pub fn from_u8(op: u8) -> Option<Self> {
        use OpCode::*;
        Some(match op {
            0 => Identify,
            1 => SelectProtocol,
            2 => Ready,
            3 => Heartbeat,
            4 => SessionDescription,
            5 => Speaking,
            6 => HeartbeatAck,
            7 => Resume,
            8 => Hello,
            9 => Resumed,
            13 => ClientDisconnect,
            _ => return None,
        })
    }
}

/// Raw control frame, as carried in a websocket message.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ControlFrame {
    /// Frame opcode.
    pub op: u8,
    /// Opcode-specific payload.
    #[serde(rename = "d", default)]
    pub payload: Value,
}

impl ControlFrame {
    /// Builds a frame from any serializable payload.
    pub fn new<T: Serialize>(op: OpCode, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            op: op as u8,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Returns this frame's opcode, if known.
    #[must_use]
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    /// Interprets the payload as `T`.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

/// Payload types for voice gateway frames.
pub mod payload {
    use super::*;

    /// Opens a new voice session.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub struct Identify {
        /// Guild the voice channel belongs to.
        pub server_id: GuildId,
        /// Session id received from the main gateway.
        pub session_id: String,
        /// Voice token received from the main gateway.
        pub token: String,
        /// Identifying user.
        pub user_id: UserId,
    }

    /// Resumes an interrupted voice session.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub struct Resume {
        /// Guild the voice channel belongs to.
        pub server_id: GuildId,
        /// Session id of the interrupted session.
        pub session_id: String,
        /// Voice token of the interrupted session.
        pub token: String,
    }

    /// Announces the local transport endpoint found via IP discovery.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub struct SelectProtocol {
        /// Transport protocol, always `"udp"`.
        pub protocol: String,
        /// Endpoint and encryption details.
        pub data: ProtocolData,
    }

    /// Endpoint and encryption details of a [`SelectProtocol`].
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub struct ProtocolData {
        /// External address of the local socket.
        pub address: IpAddr,
        /// External port of the local socket.
        pub port: u16,
        /// Encryption mode to use.
        pub mode: String,
    }

    /// Sets the local speaking state.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub struct Speaking {
        /// Speaking flags; `0` is silent, `1` is speaking.
        pub speaking: u8,
        /// Voice delay, always `0` for bots; absent from broadcasts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub delay: Option<u32>,
        /// Sending SSRC, filled in by the server when broadcast.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub ssrc: Option<u32>,
        /// Speaking user, present only in broadcasts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub user_id: Option<UserId>,
    }

    /// The voice server's UDP endpoint and capabilities.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub struct Ready {
        /// SSRC allocated to this session.
        pub ssrc: u32,
        /// Address of the voice server's UDP socket.
        pub ip: IpAddr,
        /// Port of the voice server's UDP socket.
        pub port: u16,
        /// Encryption modes supported by the voice server.
        pub modes: Vec<String>,
    }

    /// Heartbeat interval announcement.
    #[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
    pub struct Hello {
        /// Milliseconds between heartbeats.
        pub heartbeat_interval: f64,
    }

    /// The session's encryption key.
    #[derive(Clone, Deserialize, PartialEq, Serialize)]
    pub struct SessionDescription {
        /// Chosen encryption mode.
        pub mode: String,
        /// Key used to encrypt voice packets.
        pub secret_key: Vec<u8>,
    }

    impl fmt::Debug for SessionDescription {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("SessionDescription")
                .field("mode", &self.mode)
                .field("secret_key", &"<secret>")
                .finish()
        }
    }

    /// A user left the voice channel.
    #[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
    pub struct ClientDisconnect {
        /// The departing user.
        pub user_id: UserId,
    }
}

use payload::*;

/// A decoded control frame received from the voice gateway.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// The voice server's UDP endpoint and capabilities.
    Ready(Ready),
    /// Heartbeat interval announcement.
    Hello(Hello),
    /// The session's encryption key.
    SessionDescription(SessionDescription),
    /// Another user's speaking state changed.
    Speaking(Speaking),
    /// Echo of the nonce sent in a heartbeat.
    HeartbeatAck(u64),
    /// A resumed session was accepted.
    Resumed,
    /// A user left the voice channel.
    ClientDisconnect(ClientDisconnect),
    /// A frame with an opcode this library does not act on.
    Other(ControlFrame),
}

impl TryFrom<ControlFrame> for Event {
    type Error = serde_json::Error;

    fn try_from(frame: ControlFrame) -> serde_json::Result<Self> {
        Ok(match frame.opcode() {
            Some(OpCode::Ready) => Self::Ready(frame.payload()?),
            Some(OpCode::Hello) => Self::Hello(frame.payload()?),
            Some(OpCode::SessionDescription) => Self::SessionDescription(frame.payload()?),
            Some(OpCode::Speaking) => Self::Speaking(frame.payload()?),
            Some(OpCode::HeartbeatAck) => Self::HeartbeatAck(frame.payload()?),
            Some(OpCode::Resumed) => Self::Resumed,
            Some(OpCode::ClientDisconnect) => Self::ClientDisconnect(frame.payload()?),
            _ => Self::Other(frame),
        })
    }
}

/// Close codes sent by the voice gateway.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CloseCode {
    /// An invalid opcode was sent.
    UnknownOpcode = 4001,
    /// An invalid payload was sent.
    InvalidPayload = 4002,
    /// A payload was sent before identifying.
    NotAuthenticated = 4003,
    /// The identify token was rejected.
    AuthenticationFailed = 4004,
    /// More than one identify was sent.
    AlreadyAuthenticated = 4005,
    /// The session is no longer valid.
    SessionInvalid = 4006,
    /// The session timed out.
    SessionTimeout = 4009,
    /// The requested voice server could not be found.
    ServerNotFound = 4011,
    /// The selected protocol is not recognised.
    UnknownProtocol = 4012,
    /// The channel was deleted, the client was kicked, or the server moved.
    Disconnected = 4014,
    /// The voice server crashed.
    VoiceServerCrash = 4015,
    /// The selected encryption mode is not recognised.
    UnknownEncryptionMode = 4016,
}

impl CloseCode {
    /// Maps a raw websocket close code onto a known value.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        use CloseCode::*;
        Some(match code {
            4001 => UnknownOpcode,
            4002 => InvalidPayload,
            4003 => NotAuthenticated,
            4004 => AuthenticationFailed,
            4005 => AlreadyAuthenticated,
            4006 => SessionInvalid,
            4009 => SessionTimeout,
            4011 => ServerNotFound,
            4012 => UnknownProtocol,
            4014 => Disconnected,
            4015 => VoiceServerCrash,
            4016 => UnknownEncryptionMode,
            _ => return None,
        })
    }

    /// Indicates whether a fresh attempt could succeed after this code.
    #[must_use]
    pub fn should_resume(self) -> bool {
        matches!(self, Self::SessionTimeout | Self::VoiceServerCrash)
    }
}
