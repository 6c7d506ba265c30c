//! Wire encodings for control frames and voice datagrams.

use super::{
    error::{Error, Result},
    transport::SocketMessage,
};
use crate::{constants::*, model::ControlFrame};
use byteorder::{ByteOrder, LittleEndian};
use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use flate2::read::DeflateDecoder;
use std::{net::IpAddr, str::FromStr};
use tracing::debug;

/// Decodes a control frame from a text or compressed binary message.
///
/// Binary messages carry a short stream header, followed by raw deflate data.
pub(crate) fn decode_frame(message: &SocketMessage) -> Result<ControlFrame> {
    match message {
        SocketMessage::Text(text) => serde_json::from_str(text).map_err(|e| {
            debug!("Unexpected JSON: {e}. Payload: {text}");
            Error::from(e)
        }),
        SocketMessage::Binary(bytes) => {
            let body = bytes
                .get(COMPRESSED_FRAME_PREFIX..)
                .ok_or(Error::MalformedFrame)?;

            Ok(serde_json::from_reader(DeflateDecoder::new(body))?)
        },
    }
}

pub(crate) fn encode_frame(frame: &ControlFrame) -> Result<SocketMessage> {
    Ok(SocketMessage::Text(serde_json::to_string(frame)?))
}

pub(crate) fn discovery_request(ssrc: u32) -> [u8; DISCOVERY_PACKET_SIZE] {
    let mut bytes = [0; DISCOVERY_PACKET_SIZE];
    {
        let mut view = MutableIpDiscoveryPacket::new(&mut bytes[..]).expect(
            "Too few bytes in 'bytes' for IPDiscovery packet.\
                (Blame: DISCOVERY_PACKET_SIZE?)",
        );
        view.set_pkt_type(IpDiscoveryType::Request);
        view.set_length(DISCOVERY_PACKET_LENGTH);
        view.set_ssrc(ssrc);
    }

    bytes
}

/// Returns whether a datagram is shaped like an IP discovery response.
pub(crate) fn is_discovery_response(bytes: &[u8]) -> bool {
    bytes.len() == DISCOVERY_PACKET_SIZE
        && IpDiscoveryPacket::new(bytes)
            .map_or(false, |view| view.get_pkt_type() == IpDiscoveryType::Response)
}

/// Extracts the external address and port found by IP discovery.
pub(crate) fn parse_discovery_response(bytes: &[u8]) -> Result<(IpAddr, u16)> {
    let view = IpDiscoveryPacket::new(bytes).ok_or(Error::IllegalDiscoveryResponse)?;

    if view.get_pkt_type() != IpDiscoveryType::Response {
        return Err(Error::IllegalDiscoveryResponse);
    }

    // Don't assume there's a clean "left edge" of NULs, as these
    // datagrams may well be spoofed.
    let address_raw = view.get_address_raw();
    let nul_byte_index = address_raw
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::IllegalIp)?;

    let address = std::str::from_utf8(&address_raw[..nul_byte_index])
        .map_err(|_| Error::IllegalIp)
        .and_then(|s| IpAddr::from_str(s).map_err(|_| Error::IllegalIp))?;

    Ok((address, view.get_port()))
}

pub(crate) fn keepalive(counter: u64) -> [u8; KEEPALIVE_PACKET_SIZE] {
    let mut bytes = [0; KEEPALIVE_PACKET_SIZE];
    LittleEndian::write_u64(&mut bytes, counter);

    bytes
}

/// Reads back the counter of an echoed keepalive.
pub(crate) fn parse_keepalive(bytes: &[u8]) -> Option<u64> {
    (bytes.len() == KEEPALIVE_PACKET_SIZE).then(|| LittleEndian::read_u64(bytes))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::OpCode;
    use flate2::{write::ZlibEncoder, Compression};
    use std::{io::Write, net::Ipv4Addr};

    #[test]
    fn keepalives_are_little_endian() {
        assert_eq!(keepalive(0), [0; 8]);
        assert_eq!(keepalive(1), [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(keepalive(u64::MAX), [0xFF; 8]);
        assert_eq!(parse_keepalive(&keepalive(0x0102)), Some(0x0102));
        assert_eq!(parse_keepalive(&[1, 2, 3]), None);
    }

    #[test]
    fn discovery_request_layout() {
        let bytes = discovery_request(1);

        assert_eq!(bytes.len(), 74);
        assert_eq!(&bytes[..8], &[0, 1, 0, 70, 0, 0, 0, 1]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    fn discovery_response(address: &str, port: u16) -> Vec<u8> {
        let mut bytes = vec![0; DISCOVERY_PACKET_SIZE];
        bytes[1] = 2;
        bytes[3] = 70;
        bytes[8..8 + address.len()].copy_from_slice(address.as_bytes());
        bytes[72..].copy_from_slice(&port.to_be_bytes());
        bytes
    }

    #[test]
    fn discovery_response_yields_endpoint() {
        let bytes = discovery_response("203.0.113.5", 50004);

        assert!(is_discovery_response(&bytes));
        assert_eq!(
            parse_discovery_response(&bytes).unwrap(),
            (IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), 50004)
        );
    }

    #[test]
    fn discovery_response_rejects_garbage() {
        let mut bytes = discovery_response("not an ip", 1);
        assert!(matches!(
            parse_discovery_response(&bytes),
            Err(Error::IllegalIp)
        ));

        bytes[1] = 1;
        assert!(!is_discovery_response(&bytes));
        assert!(matches!(
            parse_discovery_response(&bytes),
            Err(Error::IllegalDiscoveryResponse)
        ));

        assert!(!is_discovery_response(&keepalive(3)));
    }

    #[test]
    fn compressed_frames_decode() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"{"op":8,"d":{"heartbeat_interval":41250.0}}"#)
            .unwrap();
        let bytes = encoder.finish().unwrap();

        let frame = decode_frame(&SocketMessage::Binary(bytes)).unwrap();

        assert_eq!(frame.opcode(), Some(OpCode::Hello));
        assert_eq!(frame.payload["heartbeat_interval"], 41250.0);
    }

    #[test]
    fn text_frames_decode() {
        let frame = decode_frame(&SocketMessage::Text(r#"{"op":6,"d":12}"#.into())).unwrap();

        assert_eq!(frame.opcode(), Some(OpCode::HeartbeatAck));
        assert_eq!(frame.payload, 12);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(matches!(
            decode_frame(&SocketMessage::Binary(vec![0x78])),
            Err(Error::MalformedFrame)
        ));
        assert!(decode_frame(&SocketMessage::Text("{".into())).is_err());
    }
}
