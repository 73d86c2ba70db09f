//! rtcast packet structures and serialization
//!
//! Every datagram begins with a fixed 10-byte header (magic, version, type,
//! flags, payload size) in network byte order, followed by a type-specific
//! payload. Handshake and video chunk payloads are defined in their own
//! modules; ping/pong payloads are defined here.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Packet magic value, "CAST" in ASCII
pub const PACKET_MAGIC: u32 = 0x4341_5354;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the fixed packet header in bytes
pub const HEADER_SIZE: usize = 10;

/// Maximum datagram size (MTU 1500 - IP/UDP headers)
pub const MAX_PACKET_SIZE: usize = 1472;

/// Maximum payload size carried after the fixed header
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Flag bit marking a handshake packet as the responder's reply
pub const FLAG_HANDSHAKE_RESPONSE: u16 = 0x0001;

/// Flag bit marking an encrypted payload (8-byte nonce prefix inside payload)
pub const FLAG_ENCRYPTED: u16 = 0x0002;

/// Packet types carried in the header type field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Key exchange / session establishment
    Handshake = 0x01,
    /// Video frame chunk
    Video = 0x02,
    /// Audio payload
    Audio = 0x03,
    /// Keepalive probe
    Ping = 0x06,
    /// Keepalive reply
    Pong = 0x07,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketType::Handshake),
            0x02 => Some(PacketType::Video),
            0x03 => Some(PacketType::Audio),
            0x06 => Some(PacketType::Ping),
            0x07 => Some(PacketType::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Fixed packet header
///
/// The magic and version fields are implicit; they are written on encode and
/// validated on decode rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type
    pub packet_type: PacketType,
    /// Flag bits (response, encrypted)
    pub flags: u16,
    /// Length of the payload following this header
    pub payload_size: u16,
}

impl PacketHeader {
    /// Create a header for the given type with no flags set
    pub fn new(packet_type: PacketType, payload_size: u16) -> Self {
        PacketHeader {
            packet_type,
            flags: 0,
            payload_size,
        }
    }

    /// Serialize the header (network byte order)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(PACKET_MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.packet_type.as_u8());
        buf.put_u16(self.flags);
        buf.put_u16(self.payload_size);
    }

    /// Parse and validate a header from the start of a datagram
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let magic = buf.get_u32();
        if magic != PACKET_MAGIC {
            return Err(PacketError::BadMagic(magic));
        }

        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(PacketError::UnsupportedVersion(version));
        }

        let raw_type = buf.get_u8();
        let packet_type =
            PacketType::from_u8(raw_type).ok_or(PacketError::UnknownType(raw_type))?;
        let flags = buf.get_u16();
        let payload_size = buf.get_u16();

        Ok(PacketHeader {
            packet_type,
            flags,
            payload_size,
        })
    }

    /// Check whether a flag bit is set
    #[inline]
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.flags & flag) != 0
    }
}

/// A complete packet: fixed header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, validating the payload length
    pub fn new(packet_type: PacketType, flags: u16, payload: Bytes) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Packet {
            header: PacketHeader {
                packet_type,
                flags,
                payload_size: payload.len() as u16,
            },
            payload,
        })
    }

    /// Total size on the wire
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize to a single buffer
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a complete datagram
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::decode(bytes)?;

        let expected = HEADER_SIZE + header.payload_size as usize;
        if bytes.len() < expected {
            return Err(PacketError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[HEADER_SIZE..expected]);
        Ok(Packet { header, payload })
    }
}

/// Ping/pong payload: probe sequence number plus send timestamp
///
/// A pong echoes both fields unchanged, so the sender can match the reply to
/// its pending probe and compute the round trip from its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingInfo {
    /// Probe sequence number
    pub seq: u32,
    /// Sender timestamp in microseconds
    pub timestamp_us: u64,
}

/// Ping payload wire size
pub const PING_PAYLOAD_SIZE: usize = 12;

impl PingInfo {
    pub fn new(seq: u32, timestamp_us: u64) -> Self {
        PingInfo { seq, timestamp_us }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PING_PAYLOAD_SIZE);
        buf.put_u32(self.seq);
        buf.put_u64(self.timestamp_us);
        buf.freeze()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < PING_PAYLOAD_SIZE {
            return Err(PacketError::Truncated {
                expected: PING_PAYLOAD_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        Ok(PingInfo {
            seq: buf.get_u32(),
            timestamp_us: buf.get_u64(),
        })
    }
}

/// Audio payload header: capture timestamp followed by opaque codec bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    /// Capture timestamp in microseconds
    pub timestamp_us: u64,
}

/// Audio header wire size
pub const AUDIO_HEADER_SIZE: usize = 8;

impl AudioHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.timestamp_us);
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < AUDIO_HEADER_SIZE {
            return Err(PacketError::Truncated {
                expected: AUDIO_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        Ok(AudioHeader {
            timestamp_us: buf.get_u64(),
        })
    }
}

/// Packet parsing and validation errors
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("bad packet magic: {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown packet type: {0:#04x}")]
    UnknownType(u8),

    #[error("truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::Video,
            flags: FLAG_ENCRYPTED,
            payload_size: 1024,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = PacketHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.has_flag(FLAG_ENCRYPTED));
        assert!(!decoded.has_flag(FLAG_HANDSHAKE_RESPONSE));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let header = PacketHeader::new(PacketType::Ping, 0);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf[0] ^= 0xFF;

        assert!(matches!(
            PacketHeader::decode(&buf),
            Err(PacketError::BadMagic(_))
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let header = PacketHeader::new(PacketType::Ping, 0);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf[4] = PROTOCOL_VERSION + 1;

        assert!(matches!(
            PacketHeader::decode(&buf),
            Err(PacketError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let header = PacketHeader::new(PacketType::Ping, 0);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf[5] = 0x42;

        assert!(matches!(
            PacketHeader::decode(&buf),
            Err(PacketError::UnknownType(0x42))
        ));
    }

    #[test]
    fn test_packet_roundtrip() {
        let payload = Bytes::from_static(b"chunk data");
        let packet = Packet::new(PacketType::Video, 0, payload.clone()).unwrap();

        let bytes = packet.to_bytes();
        let decoded = Packet::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.header.packet_type, PacketType::Video);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let packet = Packet::new(PacketType::Audio, 0, Bytes::from_static(&[7u8; 100])).unwrap();
        let bytes = packet.to_bytes();

        assert!(matches!(
            Packet::from_bytes(&bytes[..HEADER_SIZE + 50]),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_payload_too_large() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            Packet::new(PacketType::Video, 0, payload),
            Err(PacketError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_ping_roundtrip() {
        let ping = PingInfo::new(42, 1_234_567);
        let bytes = ping.to_bytes();
        let decoded = PingInfo::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, ping);
    }
}
