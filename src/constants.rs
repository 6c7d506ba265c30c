//! Constants affecting session lifecycles and voice transport handling.

use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Default time allowed between starting a connection attempt and the
/// session being signalled as ready.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Shortest delay between two reconnection attempts, in milliseconds.
///
/// This is also the delay used after an attempt which succeeded.
pub const RECONNECT_DELAY_MIN_MS: u64 = 1_000;

/// Longest delay between two reconnection attempts, in milliseconds.
pub const RECONNECT_DELAY_MAX_MS: u64 = 60_000;

/// Maximum uniform random jitter applied to each doubled reconnection delay,
/// in milliseconds.
pub const RECONNECT_JITTER_MS: u64 = 250;

/// Delay between sends of UDP keepalive frames.
///
/// Passive monitoring of Discord itself shows that these fire every 5 seconds
/// irrespective of outgoing UDP traffic.
pub const UDP_KEEPALIVE_GAP_MS: u64 = 5_000;

/// Type-converted delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_millis(UDP_KEEPALIVE_GAP_MS);

/// Number of bytes in a UDP keepalive datagram.
pub const KEEPALIVE_PACKET_SIZE: usize = 8;

/// Number of bytes in an IP discovery request or response.
pub const DISCOVERY_PACKET_SIZE: usize = 74;

/// Value of the length field in an IP discovery request: the size of the
/// packet excluding its type and length fields.
pub const DISCOVERY_PACKET_LENGTH: u16 = 70;

/// Number of framing bytes preceding the deflate stream of a compressed
/// control frame.
pub const COMPRESSED_FRAME_PREFIX: usize = 2;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Transport protocol named when selecting the voice data channel.
pub const VOICE_DATA_PROTOCOL: &str = "udp";
