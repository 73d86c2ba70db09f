//! Receive-side jitter buffer
//!
//! Fixed pool of slots holding decoded media until it has aged past the
//! target delay. The consumer pulls; nothing is pushed out on a timer. When
//! every slot is full the globally oldest entry is evicted and counted as a
//! drop.

use bytes::Bytes;
use parking_lot::Mutex;

/// Number of buffer slots
pub const JITTER_SLOTS: usize = 100;

/// Lower clamp on the target delay in milliseconds
pub const MIN_TARGET_DELAY_MS: f64 = 20.0;

/// Upper clamp on the target delay in milliseconds
pub const MAX_TARGET_DELAY_MS: f64 = 500.0;

#[derive(Debug)]
struct BufferedPacket {
    seq: u32,
    payload: Bytes,
    media_timestamp_us: u64,
    keyframe: bool,
    arrival_ms: u64,
}

/// An entry released by [`JitterBuffer::extract`]
#[derive(Debug)]
pub struct ReleasedPacket {
    pub seq: u32,
    pub payload: Bytes,
    pub media_timestamp_us: u64,
    pub keyframe: bool,
}

/// Buffer occupancy and drop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterStats {
    pub inserted: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub released: u64,
}

#[derive(Debug)]
struct JitterState {
    slots: Vec<Option<BufferedPacket>>,
    target_delay_ms: f64,
    stats: JitterStats,
}

/// Pull-model jitter buffer
pub struct JitterBuffer {
    state: Mutex<JitterState>,
}

impl JitterBuffer {
    pub fn new() -> Self {
        JitterBuffer {
            state: Mutex::new(JitterState {
                slots: (0..JITTER_SLOTS).map(|_| None).collect(),
                target_delay_ms: MIN_TARGET_DELAY_MS,
                stats: JitterStats::default(),
            }),
        }
    }

    /// Insert a packet; duplicates by sequence number are no-ops
    ///
    /// `now_ms` is the arrival time on the caller's monotonic clock. A full
    /// buffer evicts the oldest-by-arrival entry, counted as a drop.
    pub fn insert(
        &self,
        seq: u32,
        payload: Bytes,
        media_timestamp_us: u64,
        keyframe: bool,
        now_ms: u64,
    ) {
        let mut state = self.state.lock();

        if state
            .slots
            .iter()
            .flatten()
            .any(|p| p.seq == seq)
        {
            state.stats.duplicates += 1;
            return;
        }

        let idx = match state.slots.iter().position(|s| s.is_none()) {
            Some(idx) => idx,
            None => {
                let oldest = state.oldest_index();
                state.stats.evicted += 1;
                oldest
            }
        };

        state.slots[idx] = Some(BufferedPacket {
            seq,
            payload,
            media_timestamp_us,
            keyframe,
            arrival_ms: now_ms,
        });
        state.stats.inserted += 1;
    }

    /// Release the oldest packet that has aged past the target delay
    ///
    /// Non-blocking; returns `None` when nothing is ready so the consumer
    /// controls its own pacing.
    pub fn extract(&self, now_ms: u64) -> Option<ReleasedPacket> {
        let mut state = self.state.lock();
        let target = state.target_delay_ms;

        let idx = state
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i, p.arrival_ms)))
            .filter(|&(_, arrival)| now_ms.saturating_sub(arrival) as f64 >= target)
            .min_by_key(|&(_, arrival)| arrival)
            .map(|(i, _)| i)?;

        let packet = state.slots[idx].take()?;
        state.stats.released += 1;
        Some(ReleasedPacket {
            seq: packet.seq,
            payload: packet.payload,
            media_timestamp_us: packet.media_timestamp_us,
            keyframe: packet.keyframe,
        })
    }

    /// Recompute the target delay from fresh RTT and jitter readings
    ///
    /// The raw target is `rtt + 2 * jitter`, clamped, then blended 50/50 with
    /// the previous value so buffer depth changes stay gradual.
    pub fn update_target_delay(&self, rtt_ms: f64, jitter_ms: f64) {
        let raw = (rtt_ms + 2.0 * jitter_ms).clamp(MIN_TARGET_DELAY_MS, MAX_TARGET_DELAY_MS);
        let mut state = self.state.lock();
        state.target_delay_ms = (state.target_delay_ms + raw) / 2.0;
    }

    pub fn target_delay_ms(&self) -> f64 {
        self.state.lock().target_delay_ms
    }

    /// Number of occupied slots
    pub fn depth(&self) -> usize {
        self.state.lock().slots.iter().flatten().count()
    }

    pub fn stats(&self) -> JitterStats {
        self.state.lock().stats
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterState {
    fn oldest_index(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i, p.arrival_ms)))
            .min_by_key(|&(_, arrival)| arrival)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}
