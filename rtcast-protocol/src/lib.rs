//! rtcast wire protocol
//!
//! This crate defines the rtcast datagram format: the fixed packet header,
//! handshake payloads, keepalive probes, and the video chunking/reassembly
//! layer. It knows nothing about sockets or keys; the transport crate wires
//! these types to the network and the crypto crate.

pub mod chunk;
pub mod handshake;
pub mod packet;

pub use chunk::{
    chunk_frame, AssemblerStats, ChunkError, ChunkHeader, CompleteFrame, FrameAssembler,
    CHUNK_FLAG_KEYFRAME, CHUNK_HEADER_SIZE, MAX_CHUNK_DATA, MAX_FRAME_SIZE, REASSEMBLY_SLOTS,
};
pub use handshake::{
    HandshakePacket, HANDSHAKE_REQUEST_SIZE, HANDSHAKE_RESPONSE_SIZE, PUBLIC_KEY_SIZE,
    SIGNATURE_SIZE,
};
pub use packet::{
    AudioHeader, Packet, PacketError, PacketHeader, PacketType, PingInfo, AUDIO_HEADER_SIZE,
    FLAG_ENCRYPTED, FLAG_HANDSHAKE_RESPONSE, HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE,
    PACKET_MAGIC, PING_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
