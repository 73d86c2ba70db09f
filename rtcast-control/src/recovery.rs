//! Loss recovery: NACK retransmission and XOR parity
//!
//! Two complementary mechanisms. A bounded NACK queue retries each missing
//! sequence a few times before abandoning it, and an XOR parity packet over a
//! group lets the receiver rebuild exactly one missing member without a round
//! trip. The active strategy shifts from NACK to FEC as loss worsens.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Maximum queued NACK entries
pub const MAX_NACK_QUEUE: usize = 100;

/// Retransmission attempts before a sequence is abandoned
pub const MAX_NACK_ATTEMPTS: u32 = 3;

/// Which recovery mechanism leads at the current loss rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Below 1% loss: retransmission only, no parity overhead
    NackOnly,
    /// Below 5% loss: parity on top of retransmission
    Hybrid,
    /// At or above 5% loss: parity leads, NACK mops up
    FecPrimary,
}

impl RecoveryStrategy {
    /// Pick the strategy for a loss rate in 0.0..=1.0
    pub fn for_loss_rate(loss_rate: f64) -> Self {
        if loss_rate < 0.01 {
            RecoveryStrategy::NackOnly
        } else if loss_rate < 0.05 {
            RecoveryStrategy::Hybrid
        } else {
            RecoveryStrategy::FecPrimary
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct NackEntry {
    seq: u32,
    attempts: u32,
}

#[derive(Debug)]
struct RecoveryState {
    queue: Vec<NackEntry>,
    strategy: RecoveryStrategy,
    retransmits_sent: u64,
    abandoned: u64,
}

/// Loss recovery coordinator
pub struct LossRecovery {
    state: Mutex<RecoveryState>,
}

impl LossRecovery {
    pub fn new() -> Self {
        LossRecovery {
            state: Mutex::new(RecoveryState {
                queue: Vec::with_capacity(MAX_NACK_QUEUE),
                strategy: RecoveryStrategy::NackOnly,
                retransmits_sent: 0,
                abandoned: 0,
            }),
        }
    }

    /// Queue a retransmission request; idempotent per sequence
    ///
    /// Returns false when the queue is full and the request was discarded.
    pub fn request_retransmit(&self, seq: u32) -> bool {
        let mut state = self.state.lock();
        if state.queue.iter().any(|e| e.seq == seq) {
            return true;
        }
        if state.queue.len() >= MAX_NACK_QUEUE {
            return false;
        }
        state.queue.push(NackEntry { seq, attempts: 0 });
        true
    }

    /// Walk the queue, invoking `retransmit` for each live entry
    ///
    /// Each entry is retried up to [`MAX_NACK_ATTEMPTS`] times across calls,
    /// then abandoned; the loss becomes permanent on this path.
    pub fn process_queue<F>(&self, mut retransmit: F)
    where
        F: FnMut(u32),
    {
        let mut state = self.state.lock();
        let entries = std::mem::take(&mut state.queue);
        let mut kept = Vec::with_capacity(entries.len());

        for mut entry in entries {
            entry.attempts += 1;
            if entry.attempts > MAX_NACK_ATTEMPTS {
                debug!(seq = entry.seq, "abandoning retransmission");
                state.abandoned += 1;
                continue;
            }
            retransmit(entry.seq);
            state.retransmits_sent += 1;
            kept.push(entry);
        }

        state.queue = kept;
    }

    /// Drop a queued request once the packet finally arrived
    pub fn cancel(&self, seq: u32) {
        let mut state = self.state.lock();
        state.queue.retain(|e| e.seq != seq);
    }

    /// Re-derive the strategy from the current loss rate
    pub fn update_strategy(&self, loss_rate: f64) -> RecoveryStrategy {
        let strategy = RecoveryStrategy::for_loss_rate(loss_rate);
        self.state.lock().strategy = strategy;
        strategy
    }

    pub fn strategy(&self) -> RecoveryStrategy {
        self.state.lock().strategy
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn retransmits_sent(&self) -> u64 {
        self.state.lock().retransmits_sent
    }

    pub fn abandoned(&self) -> u64 {
        self.state.lock().abandoned
    }
}

impl Default for LossRecovery {
    fn default() -> Self {
        Self::new()
    }
}

/// XOR all packets of a group into one parity packet
///
/// Every packet must have the same length; the group must be non-empty.
pub fn encode_fec_group(packets: &[&[u8]]) -> Result<Vec<u8>, FecError> {
    let first = packets.first().ok_or(FecError::EmptyGroup)?;
    let len = first.len();

    let mut parity = vec![0u8; len];
    for packet in packets {
        if packet.len() != len {
            return Err(FecError::LengthMismatch {
                expected: len,
                actual: packet.len(),
            });
        }
        for (p, b) in parity.iter_mut().zip(packet.iter()) {
            *p ^= b;
        }
    }
    Ok(parity)
}

/// Rebuild the single missing packet of a group
///
/// `received[i]` is `None` for the missing member. XOR recovery only works
/// when exactly one member is missing; zero or multiple gaps are an error,
/// never silently wrong data.
pub fn decode_fec_group(
    parity: &[u8],
    received: &[Option<&[u8]>],
) -> Result<Vec<u8>, FecError> {
    let missing = received.iter().filter(|r| r.is_none()).count();
    if missing == 0 {
        return Err(FecError::NothingMissing);
    }
    if missing > 1 {
        return Err(FecError::TooManyMissing { missing });
    }

    let mut recovered = parity.to_vec();
    for packet in received.iter().flatten() {
        if packet.len() != parity.len() {
            return Err(FecError::LengthMismatch {
                expected: parity.len(),
                actual: packet.len(),
            });
        }
        for (r, b) in recovered.iter_mut().zip(packet.iter()) {
            *r ^= b;
        }
    }
    Ok(recovered)
}

/// FEC encode/decode errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FecError {
    #[error("FEC group is empty")]
    EmptyGroup,

    #[error("FEC packet length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("no packet missing from FEC group")]
    NothingMissing,

    #[error("{missing} packets missing from FEC group, XOR recovers at most one")]
    TooManyMissing { missing: usize },
}
