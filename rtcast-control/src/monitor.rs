//! Network condition monitoring
//!
//! Tracks RTT and jitter with TCP-style EWMA smoothing, packet loss over a
//! sliding window, and a smoothed throughput estimate. The transport's
//! receive path and the optimizer both read from the same monitor, so all
//! state sits behind one internal lock.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Maximum in-flight packets tracked for RTT matching
pub const MAX_PENDING_PACKETS: usize = 1000;

/// Number of delivery outcomes in the loss window
pub const LOSS_WINDOW: usize = 100;

/// Overall link quality derived from RTT and loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CongestionLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl CongestionLevel {
    fn classify(rtt_ms: f64, loss_rate: f64) -> Self {
        if rtt_ms < 20.0 && loss_rate < 0.001 {
            CongestionLevel::Excellent
        } else if rtt_ms < 50.0 && loss_rate < 0.01 {
            CongestionLevel::Good
        } else if rtt_ms < 100.0 && loss_rate < 0.02 {
            CongestionLevel::Fair
        } else if rtt_ms < 200.0 && loss_rate < 0.05 {
            CongestionLevel::Poor
        } else {
            CongestionLevel::Critical
        }
    }
}

/// Point-in-time snapshot of link conditions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkConditions {
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub loss_rate: f64,
    pub bandwidth_kbps: f64,
    pub congestion: CongestionLevel,
}

#[derive(Debug, Clone, Copy)]
struct PendingPacket {
    seq: u32,
    sent_us: u64,
}

#[derive(Debug)]
struct MonitorState {
    /// Smoothed RTT in milliseconds, 0 until the first sample
    rtt_ms: f64,
    /// Smoothed RTT deviation, doubles as the jitter estimate
    rtt_var_ms: f64,
    has_rtt_sample: bool,
    pending: VecDeque<PendingPacket>,
    /// Sliding window of delivery outcomes, true = lost
    loss_window: VecDeque<bool>,
    bandwidth_kbps: f64,
    packets_sent: u64,
    packets_acked: u64,
    packets_lost: u64,
}

/// Shared network condition tracker
pub struct NetworkMonitor {
    state: Mutex<MonitorState>,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        NetworkMonitor {
            state: Mutex::new(MonitorState {
                rtt_ms: 0.0,
                rtt_var_ms: 0.0,
                has_rtt_sample: false,
                pending: VecDeque::with_capacity(MAX_PENDING_PACKETS),
                loss_window: VecDeque::with_capacity(LOSS_WINDOW),
                bandwidth_kbps: 0.0,
                packets_sent: 0,
                packets_acked: 0,
                packets_lost: 0,
            }),
        }
    }

    /// Record an outbound packet for later RTT matching
    ///
    /// When the pending table is full the oldest entry is evicted; its ack
    /// will simply go unmatched.
    pub fn record_sent(&self, seq: u32, sent_us: u64) {
        let mut state = self.state.lock();
        if state.pending.len() >= MAX_PENDING_PACKETS {
            state.pending.pop_front();
        }
        state.pending.push_back(PendingPacket { seq, sent_us });
        state.packets_sent += 1;
    }

    /// Record an acknowledgement, folding the RTT sample into the estimate
    pub fn record_ack(&self, seq: u32, acked_us: u64) {
        let mut state = self.state.lock();
        let Some(pos) = state.pending.iter().position(|p| p.seq == seq) else {
            return;
        };
        let Some(pending) = state.pending.remove(pos) else {
            return;
        };
        state.packets_acked += 1;
        state.push_outcome(false);

        if acked_us <= pending.sent_us {
            return;
        }
        let sample_ms = (acked_us - pending.sent_us) as f64 / 1000.0;

        // RFC 6298 style smoothing: alpha 1/8, beta 1/4.
        if state.has_rtt_sample {
            let err = (sample_ms - state.rtt_ms).abs();
            state.rtt_var_ms = 0.75 * state.rtt_var_ms + 0.25 * err;
            state.rtt_ms = 0.875 * state.rtt_ms + 0.125 * sample_ms;
        } else {
            state.rtt_ms = sample_ms;
            state.rtt_var_ms = sample_ms / 2.0;
            state.has_rtt_sample = true;
        }
    }

    /// Record a packet confirmed lost
    pub fn record_lost(&self, seq: u32) {
        let mut state = self.state.lock();
        if let Some(pos) = state.pending.iter().position(|p| p.seq == seq) {
            state.pending.remove(pos);
        }
        state.packets_lost += 1;
        state.push_outcome(true);
    }

    /// Fold a throughput sample into the smoothed bandwidth estimate
    pub fn record_throughput(&self, bytes: usize, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        let sample_kbps = (bytes as f64 * 8.0) / elapsed.as_secs_f64() / 1000.0;
        let mut state = self.state.lock();
        if state.bandwidth_kbps == 0.0 {
            state.bandwidth_kbps = sample_kbps;
        } else {
            state.bandwidth_kbps = 0.8 * state.bandwidth_kbps + 0.2 * sample_kbps;
        }
    }

    pub fn rtt_ms(&self) -> f64 {
        self.state.lock().rtt_ms
    }

    pub fn jitter_ms(&self) -> f64 {
        self.state.lock().rtt_var_ms
    }

    /// Loss rate over the sliding window, 0.0..=1.0
    pub fn loss_rate(&self) -> f64 {
        let state = self.state.lock();
        state.loss_rate()
    }

    pub fn bandwidth_kbps(&self) -> f64 {
        self.state.lock().bandwidth_kbps
    }

    pub fn congestion_level(&self) -> CongestionLevel {
        let state = self.state.lock();
        CongestionLevel::classify(state.rtt_ms, state.loss_rate())
    }

    /// Consistent snapshot of all tracked conditions
    pub fn conditions(&self) -> NetworkConditions {
        let state = self.state.lock();
        let loss_rate = state.loss_rate();
        NetworkConditions {
            rtt_ms: state.rtt_ms,
            jitter_ms: state.rtt_var_ms,
            loss_rate,
            bandwidth_kbps: state.bandwidth_kbps,
            congestion: CongestionLevel::classify(state.rtt_ms, loss_rate),
        }
    }

    pub fn packets_sent(&self) -> u64 {
        self.state.lock().packets_sent
    }

    pub fn packets_lost(&self) -> u64 {
        self.state.lock().packets_lost
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    fn push_outcome(&mut self, lost: bool) {
        if self.loss_window.len() >= LOSS_WINDOW {
            self.loss_window.pop_front();
        }
        self.loss_window.push_back(lost);
    }

    fn loss_rate(&self) -> f64 {
        if self.loss_window.is_empty() {
            return 0.0;
        }
        let lost = self.loss_window.iter().filter(|&&l| l).count();
        lost as f64 / self.loss_window.len() as f64
    }
}
