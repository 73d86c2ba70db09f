//! Network optimizer
//!
//! Owns one instance of every control component and drives them on a
//! caller-chosen cadence. Each tick reads fresh conditions, applies one AIMD
//! step, re-evaluates the profile ladder, retunes the jitter buffer and the
//! recovery strategy, and publishes an event exactly when observable state
//! changed since the previous tick.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::abr::{AbrController, AbrError, StreamProfile};
use crate::bandwidth::BandwidthEstimator;
use crate::jitter::JitterBuffer;
use crate::monitor::{CongestionLevel, NetworkConditions, NetworkMonitor};
use crate::qos::QosPolicy;
use crate::recovery::LossRecovery;

/// Loss rate above which a tick counts as congested
pub const CONGESTION_LOSS_THRESHOLD: f64 = 0.01;

/// RTT above which a tick counts as congested, in milliseconds
pub const CONGESTION_RTT_THRESHOLD_MS: f64 = 100.0;

/// State changes published by the optimizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizerEvent {
    /// The recommended bitrate moved to a new profile
    BitrateChanged(u32),
    /// Congestion check flipped from clear to congested
    CongestionDetected,
    /// Link quality fell to Poor or Critical
    NetworkDegraded,
    /// Link quality returned to Fair or better after a degradation
    NetworkRecovered,
}

/// Snapshot rendered by [`NetworkOptimizer::diagnostics`]
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub conditions: NetworkConditions,
    pub estimate_kbps: f64,
    pub profile: StreamProfile,
    pub profile_switches: u64,
    pub recovery_queue: usize,
    pub ticks: u64,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rtt={:.1}ms jitter={:.1}ms loss={:.2}% level={:?}",
            self.conditions.rtt_ms,
            self.conditions.jitter_ms,
            self.conditions.loss_rate * 100.0,
            self.conditions.congestion,
        )?;
        writeln!(
            f,
            "measured={:.0}kbps estimate={:.0}kbps profile={} ({}kbps) switches={}",
            self.conditions.bandwidth_kbps,
            self.estimate_kbps,
            self.profile.name,
            self.profile.bitrate_kbps,
            self.profile_switches,
        )?;
        write!(f, "nack_queue={} ticks={}", self.recovery_queue, self.ticks)
    }
}

/// Coordinator over monitor, estimator, ABR, QoS, jitter and recovery
pub struct NetworkOptimizer {
    monitor: Arc<NetworkMonitor>,
    jitter: Arc<JitterBuffer>,
    recovery: Arc<LossRecovery>,
    estimator: BandwidthEstimator,
    abr: AbrController,
    qos: QosPolicy,
    events: Sender<OptimizerEvent>,
    was_congested: bool,
    was_degraded: bool,
    ticks: u64,
}

impl NetworkOptimizer {
    /// Build an optimizer over a profile ladder, returning the event stream
    pub fn new(
        profiles: Vec<StreamProfile>,
    ) -> Result<(Self, Receiver<OptimizerEvent>), AbrError> {
        let (tx, rx) = unbounded();
        Ok((
            NetworkOptimizer {
                monitor: Arc::new(NetworkMonitor::new()),
                jitter: Arc::new(JitterBuffer::new()),
                recovery: Arc::new(LossRecovery::new()),
                estimator: BandwidthEstimator::new(),
                abr: AbrController::new(profiles)?,
                qos: QosPolicy::new(),
                events: tx,
                was_congested: false,
                was_degraded: false,
                ticks: 0,
            },
            rx,
        ))
    }

    /// Shared handle for the transport's receive path
    pub fn monitor(&self) -> Arc<NetworkMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Shared handle for the playback path
    pub fn jitter_buffer(&self) -> Arc<JitterBuffer> {
        Arc::clone(&self.jitter)
    }

    /// Shared handle for the retransmission path
    pub fn recovery(&self) -> Arc<LossRecovery> {
        Arc::clone(&self.recovery)
    }

    pub fn qos(&self) -> QosPolicy {
        self.qos.clone()
    }

    pub fn current_profile(&self) -> &StreamProfile {
        self.abr.current_profile()
    }

    /// Snap the ladder to a caller-chosen bitrate
    pub fn set_target_bitrate(&mut self, bitrate_kbps: u32, now_ms: u64) {
        let profile = self.abr.set_target_bitrate(bitrate_kbps, now_ms).clone();
        let _ = self.events.send(OptimizerEvent::BitrateChanged(profile.bitrate_kbps));
    }

    /// Run one optimization tick
    ///
    /// `now_ms` is the caller's monotonic clock; ticks are caller-driven so
    /// tests and embedders control the cadence.
    pub fn optimize(&mut self, now_ms: u64) {
        self.ticks += 1;
        let conditions = self.monitor.conditions();

        let congested = conditions.loss_rate > CONGESTION_LOSS_THRESHOLD
            || conditions.rtt_ms > CONGESTION_RTT_THRESHOLD_MS;
        self.estimator.update(congested);

        if congested && !self.was_congested {
            warn!(
                rtt_ms = conditions.rtt_ms,
                loss = conditions.loss_rate,
                "congestion detected"
            );
            let _ = self.events.send(OptimizerEvent::CongestionDetected);
        }
        self.was_congested = congested;

        let degraded = conditions.congestion >= CongestionLevel::Poor;
        if degraded && !self.was_degraded {
            let _ = self.events.send(OptimizerEvent::NetworkDegraded);
        } else if !degraded && self.was_degraded {
            info!("network recovered");
            let _ = self.events.send(OptimizerEvent::NetworkRecovered);
        }
        self.was_degraded = degraded;

        if let Some(profile) =
            self.abr
                .evaluate(self.estimator.estimate_kbps(), conditions.congestion, now_ms)
        {
            let _ = self
                .events
                .send(OptimizerEvent::BitrateChanged(profile.bitrate_kbps));
        }

        self.jitter
            .update_target_delay(conditions.rtt_ms, conditions.jitter_ms);
        self.recovery.update_strategy(conditions.loss_rate);
    }

    /// Structured snapshot for logs and status displays
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            conditions: self.monitor.conditions(),
            estimate_kbps: self.estimator.estimate_kbps(),
            profile: self.abr.current_profile().clone(),
            profile_switches: self.abr.switches(),
            recovery_queue: self.recovery.queue_len(),
            ticks: self.ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::default_profiles;
    use crate::recovery::RecoveryStrategy;

    fn optimizer() -> (NetworkOptimizer, Receiver<OptimizerEvent>) {
        NetworkOptimizer::new(default_profiles()).unwrap()
    }

    fn feed_rtt(monitor: &NetworkMonitor, rtt_us: u64, count: u32) {
        for seq in 0..count {
            let base = seq as u64 * 1_000_000;
            monitor.record_sent(seq, base);
            monitor.record_ack(seq, base + rtt_us);
        }
    }

    #[test]
    fn test_congestion_event_fires_on_rising_edge() {
        let (mut opt, events) = optimizer();
        feed_rtt(&opt.monitor(), 150_000, 20);

        opt.optimize(0);
        assert_eq!(events.try_recv().unwrap(), OptimizerEvent::CongestionDetected);

        // Still congested: no second event.
        opt.optimize(100);
        assert!(events
            .try_iter()
            .all(|e| e != OptimizerEvent::CongestionDetected));
    }

    #[test]
    fn test_degraded_and_recovered_events() {
        let (mut opt, events) = optimizer();
        let monitor = opt.monitor();

        feed_rtt(&monitor, 150_000, 20);
        opt.optimize(0);
        assert!(events.try_iter().any(|e| e == OptimizerEvent::NetworkDegraded));

        // Drive the smoothed RTT back down.
        feed_rtt(&monitor, 10_000, 200);
        opt.optimize(100);
        assert!(events
            .try_iter()
            .any(|e| e == OptimizerEvent::NetworkRecovered));
    }

    #[test]
    fn test_bitrate_change_event_on_profile_switch() {
        let (mut opt, events) = optimizer();
        feed_rtt(&opt.monitor(), 10_000, 20);

        // Clean ticks grow the estimate through slow start until the ladder
        // steps up; the hold interval spaces the switches out.
        let mut now = 0u64;
        let mut changes = Vec::new();
        for _ in 0..6 {
            opt.optimize(now);
            now += 6_000;
            changes.extend(events.try_iter().filter_map(|e| match e {
                OptimizerEvent::BitrateChanged(kbps) => Some(kbps),
                _ => None,
            }));
        }

        assert!(!changes.is_empty());
        assert_eq!(changes[0], 2_500);
    }

    #[test]
    fn test_fair_link_never_steps_the_ladder_up() {
        let (mut opt, events) = optimizer();
        // 60 ms RTT with no loss classifies as Fair: below the AIMD
        // congestion threshold, so the estimate keeps growing, but the
        // ladder must not step up.
        feed_rtt(&opt.monitor(), 60_000, 20);

        let mut now = 0u64;
        for _ in 0..10 {
            opt.optimize(now);
            now += 6_000;
        }

        assert_eq!(opt.current_profile().name, "480p30");
        assert!(events
            .try_iter()
            .all(|e| !matches!(e, OptimizerEvent::BitrateChanged(_))));
    }

    #[test]
    fn test_tick_updates_jitter_and_recovery() {
        let (mut opt, _events) = optimizer();
        let monitor = opt.monitor();
        feed_rtt(&monitor, 80_000, 20);
        for seq in 100..110u32 {
            monitor.record_sent(seq, 0);
            monitor.record_lost(seq);
        }

        opt.optimize(0);

        assert!(opt.jitter_buffer().target_delay_ms() > 20.0);
        assert_eq!(opt.recovery().strategy(), RecoveryStrategy::FecPrimary);
    }

    #[test]
    fn test_diagnostics_render() {
        let (mut opt, _events) = optimizer();
        opt.optimize(0);

        let diag = opt.diagnostics();
        assert_eq!(diag.ticks, 1);
        let rendered = diag.to_string();
        assert!(rendered.contains("rtt="));
        assert!(rendered.contains("profile=480p30"));
    }
}
