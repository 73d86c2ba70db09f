//! Video frame chunking and reassembly
//!
//! Frames larger than a datagram are split into chunks, each carrying a
//! 24-byte chunk header after the generic packet header. The receiver keeps a
//! small fixed table of in-flight frames and delivers a frame once all of its
//! bytes have arrived. Chunks for an unknown frame claim a free slot; when the
//! table is full the chunk is dropped and counted.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::packet::{PacketError, MAX_PAYLOAD_SIZE};

/// Chunk header size in bytes
pub const CHUNK_HEADER_SIZE: usize = 24;

/// Maximum chunk data bytes per datagram
pub const MAX_CHUNK_DATA: usize = MAX_PAYLOAD_SIZE - CHUNK_HEADER_SIZE;

/// Maximum reassembled frame size (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Number of in-flight frame reassembly slots
pub const REASSEMBLY_SLOTS: usize = 16;

/// Chunk flag bit marking the frame as a keyframe
pub const CHUNK_FLAG_KEYFRAME: u16 = 0x0001;

/// Per-chunk header carried inside a video packet payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Frame this chunk belongs to
    pub frame_id: u32,
    /// Total size of the reassembled frame
    pub total_size: u32,
    /// Byte offset of this chunk within the frame
    pub offset: u32,
    /// Number of data bytes following this header
    pub chunk_size: u16,
    /// Chunk flag bits (keyframe)
    pub flags: u16,
    /// Frame capture timestamp in microseconds
    pub timestamp_us: u64,
}

impl ChunkHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.frame_id);
        buf.put_u32(self.total_size);
        buf.put_u32(self.offset);
        buf.put_u16(self.chunk_size);
        buf.put_u16(self.flags);
        buf.put_u64(self.timestamp_us);
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(PacketError::Truncated {
                expected: CHUNK_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..CHUNK_HEADER_SIZE];
        Ok(ChunkHeader {
            frame_id: buf.get_u32(),
            total_size: buf.get_u32(),
            offset: buf.get_u32(),
            chunk_size: buf.get_u16(),
            flags: buf.get_u16(),
            timestamp_us: buf.get_u64(),
        })
    }

    pub fn is_keyframe(&self) -> bool {
        (self.flags & CHUNK_FLAG_KEYFRAME) != 0
    }
}

/// Split a frame into chunk payloads ready to wrap in video packets
///
/// Each element is a chunk header followed by its slice of the frame. Frames
/// above [`MAX_FRAME_SIZE`] are rejected.
pub fn chunk_frame(
    frame_id: u32,
    frame: &[u8],
    timestamp_us: u64,
    keyframe: bool,
    max_chunk_data: usize,
) -> Result<Vec<Bytes>, ChunkError> {
    if frame.is_empty() {
        return Err(ChunkError::EmptyFrame);
    }
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ChunkError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let flags = if keyframe { CHUNK_FLAG_KEYFRAME } else { 0 };
    let mut chunks = Vec::with_capacity((frame.len() + max_chunk_data - 1) / max_chunk_data);
    let mut offset = 0usize;

    while offset < frame.len() {
        let len = max_chunk_data.min(frame.len() - offset);
        let header = ChunkHeader {
            frame_id,
            total_size: frame.len() as u32,
            offset: offset as u32,
            chunk_size: len as u16,
            flags,
            timestamp_us,
        };

        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + len);
        header.encode(&mut buf);
        buf.put_slice(&frame[offset..offset + len]);
        chunks.push(buf.freeze());

        offset += len;
    }

    Ok(chunks)
}

/// A fully reassembled frame ready for delivery
#[derive(Debug, Clone)]
pub struct CompleteFrame {
    pub frame_id: u32,
    pub payload: Bytes,
    pub timestamp_us: u64,
    pub keyframe: bool,
}

#[derive(Debug)]
struct FrameBuffer {
    frame_id: u32,
    total_size: usize,
    received: usize,
    keyframe: bool,
    timestamp_us: u64,
    data: Vec<u8>,
}

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Chunks accepted into a slot
    pub chunks_accepted: u64,
    /// Chunks dropped because no slot was free
    pub chunks_dropped: u64,
    /// Frames delivered complete
    pub frames_completed: u64,
}

/// Fixed-slot reassembler for in-flight video frames
#[derive(Debug)]
pub struct FrameAssembler {
    slots: [Option<FrameBuffer>; REASSEMBLY_SLOTS],
    stats: AssemblerStats,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            slots: Default::default(),
            stats: AssemblerStats::default(),
        }
    }

    /// Feed one decoded chunk; returns the frame if this chunk completed it
    pub fn push(
        &mut self,
        header: &ChunkHeader,
        data: &[u8],
    ) -> Result<Option<CompleteFrame>, ChunkError> {
        if data.len() != header.chunk_size as usize {
            return Err(ChunkError::ChunkSizeMismatch {
                declared: header.chunk_size as usize,
                actual: data.len(),
            });
        }

        let total = header.total_size as usize;
        if total == 0 || total > MAX_FRAME_SIZE {
            return Err(ChunkError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }

        let end = header.offset as usize + data.len();
        if end > total {
            return Err(ChunkError::ChunkOutOfBounds {
                offset: header.offset as usize,
                size: data.len(),
                total,
            });
        }

        let idx = match self.find_slot(header) {
            Some(idx) => idx,
            None => {
                self.stats.chunks_dropped += 1;
                return Ok(None);
            }
        };

        let slot = &mut self.slots[idx];
        let buffer = slot.get_or_insert_with(|| FrameBuffer {
            frame_id: header.frame_id,
            total_size: total,
            received: 0,
            keyframe: header.is_keyframe(),
            timestamp_us: header.timestamp_us,
            data: vec![0u8; total],
        });

        // The buffer was sized by the first chunk; later chunks must agree
        // on the frame size or their offsets cannot be trusted.
        if buffer.total_size != total {
            return Err(ChunkError::TotalSizeConflict {
                frame_id: header.frame_id,
                expected: buffer.total_size,
                actual: total,
            });
        }

        buffer.data[header.offset as usize..end].copy_from_slice(data);
        buffer.received += data.len();
        self.stats.chunks_accepted += 1;

        if buffer.received >= buffer.total_size {
            if let Some(buffer) = slot.take() {
                self.stats.frames_completed += 1;
                return Ok(Some(CompleteFrame {
                    frame_id: buffer.frame_id,
                    payload: Bytes::from(buffer.data),
                    timestamp_us: buffer.timestamp_us,
                    keyframe: buffer.keyframe,
                }));
            }
        }

        Ok(None)
    }

    /// Slot already tracking this frame, or a free slot to claim
    fn find_slot(&self, header: &ChunkHeader) -> Option<usize> {
        let mut free = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(buffer) if buffer.frame_id == header.frame_id => return Some(idx),
                None if free.is_none() => free = Some(idx),
                _ => {}
            }
        }
        free
    }

    /// Number of frames currently in flight
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunking and reassembly errors
#[derive(thiserror::Error, Debug)]
pub enum ChunkError {
    #[error("cannot chunk an empty frame")]
    EmptyFrame,

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("chunk size mismatch: header declares {declared}, payload carries {actual}")]
    ChunkSizeMismatch { declared: usize, actual: usize },

    #[error("chunk out of bounds: offset {offset} + size {size} > total {total}")]
    ChunkOutOfBounds {
        offset: usize,
        size: usize,
        total: usize,
    },

    #[error("frame {frame_id} total size changed mid-flight: {expected} then {actual}")]
    TotalSizeConflict {
        frame_id: u32,
        expected: usize,
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_chunk(
        assembler: &mut FrameAssembler,
        chunk: &Bytes,
    ) -> Option<CompleteFrame> {
        let header = ChunkHeader::decode(chunk).unwrap();
        assembler
            .push(&header, &chunk[CHUNK_HEADER_SIZE..])
            .unwrap()
    }

    #[test]
    fn test_chunk_header_roundtrip() {
        let header = ChunkHeader {
            frame_id: 7,
            total_size: 100_000,
            offset: 1438,
            chunk_size: 1438,
            flags: CHUNK_FLAG_KEYFRAME,
            timestamp_us: 99_000_000,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), CHUNK_HEADER_SIZE);

        let decoded = ChunkHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_keyframe());
    }

    #[test]
    fn test_chunk_and_reassemble() {
        let frame: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let chunks = chunk_frame(1, &frame, 42, true, MAX_CHUNK_DATA).unwrap();
        assert!(chunks.len() > 1);

        let mut assembler = FrameAssembler::new();
        let mut complete = None;
        for chunk in &chunks {
            if let Some(frame) = feed_chunk(&mut assembler, chunk) {
                complete = Some(frame);
            }
        }

        let complete = complete.expect("frame should complete");
        assert_eq!(complete.frame_id, 1);
        assert_eq!(&complete.payload[..], &frame[..]);
        assert!(complete.keyframe);
        assert_eq!(complete.timestamp_us, 42);
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let frame: Vec<u8> = (0..5_000u32).map(|i| (i % 253) as u8).collect();
        let mut chunks = chunk_frame(2, &frame, 0, false, 512).unwrap();
        chunks.reverse();

        let mut assembler = FrameAssembler::new();
        let mut completions = 0;
        for chunk in &chunks {
            if feed_chunk(&mut assembler, chunk).is_some() {
                completions += 1;
            }
        }

        assert_eq!(completions, 1);
    }

    #[test]
    fn test_slot_exhaustion_drops_chunk() {
        let mut assembler = FrameAssembler::new();
        let frame = vec![0u8; 4096];

        // Occupy every slot with a first chunk of a distinct frame.
        for frame_id in 0..REASSEMBLY_SLOTS as u32 {
            let chunks = chunk_frame(frame_id, &frame, 0, false, 1024).unwrap();
            assert!(feed_chunk(&mut assembler, &chunks[0]).is_none());
        }
        assert_eq!(assembler.in_flight(), REASSEMBLY_SLOTS);

        let overflow = chunk_frame(999, &frame, 0, false, 1024).unwrap();
        assert!(feed_chunk(&mut assembler, &overflow[0]).is_none());
        assert_eq!(assembler.stats().chunks_dropped, 1);
    }

    #[test]
    fn test_out_of_bounds_chunk_rejected() {
        let mut assembler = FrameAssembler::new();
        let header = ChunkHeader {
            frame_id: 3,
            total_size: 100,
            offset: 90,
            chunk_size: 20,
            flags: 0,
            timestamp_us: 0,
        };

        assert!(matches!(
            assembler.push(&header, &[0u8; 20]),
            Err(ChunkError::ChunkOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_total_size_conflict_rejected() {
        let mut assembler = FrameAssembler::new();
        let first = ChunkHeader {
            frame_id: 3,
            total_size: 100,
            offset: 0,
            chunk_size: 50,
            flags: 0,
            timestamp_us: 0,
        };
        assert!(assembler.push(&first, &[0u8; 50]).unwrap().is_none());

        // Same frame id, larger claimed total: the offset lands past the
        // buffer allocated for the first chunk and must be refused.
        let conflicting = ChunkHeader {
            frame_id: 3,
            total_size: 200,
            offset: 150,
            chunk_size: 50,
            flags: 0,
            timestamp_us: 0,
        };
        assert!(matches!(
            assembler.push(&conflicting, &[0u8; 50]),
            Err(ChunkError::TotalSizeConflict { .. })
        ));

        // The original frame still completes.
        let second = ChunkHeader {
            frame_id: 3,
            total_size: 100,
            offset: 50,
            chunk_size: 50,
            flags: 0,
            timestamp_us: 0,
        };
        assert!(assembler.push(&second, &[0u8; 50]).unwrap().is_some());
    }

    #[test]
    fn test_chunk_size_mismatch_rejected() {
        let mut assembler = FrameAssembler::new();
        let header = ChunkHeader {
            frame_id: 3,
            total_size: 100,
            offset: 0,
            chunk_size: 50,
            flags: 0,
            timestamp_us: 0,
        };

        assert!(matches!(
            assembler.push(&header, &[0u8; 40]),
            Err(ChunkError::ChunkSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(matches!(
            chunk_frame(0, &[], 0, false, MAX_CHUNK_DATA),
            Err(ChunkError::EmptyFrame)
        ));
    }
}
