//! Handshake payload encoding
//!
//! The initiator sends its public key, a signed timestamp, and the signature
//! over that timestamp. The responder replies with the same fields plus the
//! peer id it assigned, and sets the response flag in the packet header.
//! Key material and signature semantics live in the crypto crate; this module
//! only handles the wire layout.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::packet::PacketError;

/// Length of a public key on the wire
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Length of a signature on the wire
pub const SIGNATURE_SIZE: usize = 64;

/// Handshake request payload size: key + timestamp + signature
pub const HANDSHAKE_REQUEST_SIZE: usize = PUBLIC_KEY_SIZE + 8 + SIGNATURE_SIZE;

/// Handshake response payload size: request fields + assigned peer id
pub const HANDSHAKE_RESPONSE_SIZE: usize = HANDSHAKE_REQUEST_SIZE + 8;

/// Handshake payload
///
/// `peer_id` is `Some` only in the responder's reply; its presence must agree
/// with the response flag in the enclosing packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePacket {
    /// Sender's long-term public key
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    /// Timestamp covered by the signature, microseconds since the epoch
    pub timestamp_us: i64,
    /// Signature over the big-endian timestamp bytes
    pub signature: [u8; SIGNATURE_SIZE],
    /// Peer id assigned by the responder
    pub peer_id: Option<u64>,
}

impl HandshakePacket {
    /// Build an initiator's request payload
    pub fn request(
        public_key: [u8; PUBLIC_KEY_SIZE],
        timestamp_us: i64,
        signature: [u8; SIGNATURE_SIZE],
    ) -> Self {
        HandshakePacket {
            public_key,
            timestamp_us,
            signature,
            peer_id: None,
        }
    }

    /// Build a responder's reply payload
    pub fn response(
        public_key: [u8; PUBLIC_KEY_SIZE],
        timestamp_us: i64,
        signature: [u8; SIGNATURE_SIZE],
        peer_id: u64,
    ) -> Self {
        HandshakePacket {
            public_key,
            timestamp_us,
            signature,
            peer_id: Some(peer_id),
        }
    }

    /// The bytes the signature covers
    pub fn signed_bytes(&self) -> [u8; 8] {
        self.timestamp_us.to_be_bytes()
    }

    pub fn is_response(&self) -> bool {
        self.peer_id.is_some()
    }

    pub fn to_bytes(&self) -> Bytes {
        let size = if self.peer_id.is_some() {
            HANDSHAKE_RESPONSE_SIZE
        } else {
            HANDSHAKE_REQUEST_SIZE
        };

        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(&self.public_key);
        buf.put_i64(self.timestamp_us);
        buf.put_slice(&self.signature);
        if let Some(peer_id) = self.peer_id {
            buf.put_u64(peer_id);
        }
        buf.freeze()
    }

    /// Parse a handshake payload
    ///
    /// `is_response` comes from the enclosing header's flag bit and selects
    /// which of the two fixed sizes is expected.
    pub fn from_bytes(bytes: &[u8], is_response: bool) -> Result<Self, PacketError> {
        let expected = if is_response {
            HANDSHAKE_RESPONSE_SIZE
        } else {
            HANDSHAKE_REQUEST_SIZE
        };
        if bytes.len() < expected {
            return Err(PacketError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        buf.copy_to_slice(&mut public_key);
        let timestamp_us = buf.get_i64();
        let mut signature = [0u8; SIGNATURE_SIZE];
        buf.copy_to_slice(&mut signature);
        let peer_id = if is_response { Some(buf.get_u64()) } else { None };

        Ok(HandshakePacket {
            public_key,
            timestamp_us,
            signature,
            peer_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(peer_id: Option<u64>) -> HandshakePacket {
        HandshakePacket {
            public_key: [0xAB; PUBLIC_KEY_SIZE],
            timestamp_us: 1_700_000_000_000_000,
            signature: [0xCD; SIGNATURE_SIZE],
            peer_id,
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let hs = sample(None);
        let bytes = hs.to_bytes();
        assert_eq!(bytes.len(), HANDSHAKE_REQUEST_SIZE);

        let decoded = HandshakePacket::from_bytes(&bytes, false).unwrap();
        assert_eq!(decoded, hs);
        assert!(!decoded.is_response());
    }

    #[test]
    fn test_response_roundtrip() {
        let hs = sample(Some(0xDEAD_BEEF_CAFE));
        let bytes = hs.to_bytes();
        assert_eq!(bytes.len(), HANDSHAKE_RESPONSE_SIZE);

        let decoded = HandshakePacket::from_bytes(&bytes, true).unwrap();
        assert_eq!(decoded.peer_id, Some(0xDEAD_BEEF_CAFE));
    }

    #[test]
    fn test_truncated_rejected() {
        let hs = sample(None);
        let bytes = hs.to_bytes();

        assert!(matches!(
            HandshakePacket::from_bytes(&bytes[..50], false),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_response_size_enforced() {
        // A request-sized payload is too short when the response flag is set.
        let hs = sample(None);
        let bytes = hs.to_bytes();

        assert!(matches!(
            HandshakePacket::from_bytes(&bytes, true),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_signed_bytes_are_timestamp() {
        let hs = sample(None);
        assert_eq!(hs.signed_bytes(), hs.timestamp_us.to_be_bytes());
    }
}
