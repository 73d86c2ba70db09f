//! AIMD bandwidth estimation
//!
//! Keeps an independent estimate of usable capacity, separate from the
//! monitor's measured throughput. The estimate doubles during slow start,
//! grows additively afterwards, and halves on every congestion signal.

use tracing::debug;

/// Floor of the estimate in kbps
pub const MIN_ESTIMATE_KBPS: f64 = 1_000.0;

/// Ceiling of the estimate in kbps
pub const MAX_ESTIMATE_KBPS: f64 = 1_000_000.0;

/// Estimate at which slow start hands over to additive increase (10 Mbps)
pub const SLOW_START_EXIT_KBPS: f64 = 10_000.0;

/// Additive step per congestion-free update (1 Mbps)
pub const INCREASE_STEP_KBPS: f64 = 1_000.0;

/// Estimator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorPhase {
    /// Doubling the estimate until the handover threshold
    SlowStart,
    /// Additive growth
    CongestionAvoidance,
    /// Just backed off, growing additively again
    FastRecovery,
}

/// AIMD capacity estimator
#[derive(Debug, Clone)]
pub struct BandwidthEstimator {
    estimate_kbps: f64,
    phase: EstimatorPhase,
}

impl BandwidthEstimator {
    pub fn new() -> Self {
        BandwidthEstimator {
            estimate_kbps: MIN_ESTIMATE_KBPS,
            phase: EstimatorPhase::SlowStart,
        }
    }

    /// Start from a known-good capacity figure
    pub fn with_initial_kbps(kbps: f64) -> Self {
        BandwidthEstimator {
            estimate_kbps: kbps.clamp(MIN_ESTIMATE_KBPS, MAX_ESTIMATE_KBPS),
            phase: EstimatorPhase::CongestionAvoidance,
        }
    }

    /// Apply one AIMD step
    ///
    /// `congested` comes from a fresh congestion check (loss above 1% or RTT
    /// above 100ms); true halves the estimate, false grows it.
    pub fn update(&mut self, congested: bool) {
        if congested {
            self.estimate_kbps = (self.estimate_kbps * 0.5).max(MIN_ESTIMATE_KBPS);
            self.phase = EstimatorPhase::FastRecovery;
            debug!(estimate_kbps = self.estimate_kbps, "bandwidth estimate halved");
            return;
        }

        match self.phase {
            EstimatorPhase::SlowStart => {
                self.estimate_kbps = (self.estimate_kbps * 2.0).min(MAX_ESTIMATE_KBPS);
                if self.estimate_kbps >= SLOW_START_EXIT_KBPS {
                    self.phase = EstimatorPhase::CongestionAvoidance;
                }
            }
            EstimatorPhase::CongestionAvoidance | EstimatorPhase::FastRecovery => {
                self.estimate_kbps = (self.estimate_kbps + INCREASE_STEP_KBPS).min(MAX_ESTIMATE_KBPS);
                self.phase = EstimatorPhase::CongestionAvoidance;
            }
        }
    }

    pub fn estimate_kbps(&self) -> f64 {
        self.estimate_kbps
    }

    pub fn phase(&self) -> EstimatorPhase {
        self.phase
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_start_doubles() {
        let mut est = BandwidthEstimator::new();
        assert_eq!(est.phase(), EstimatorPhase::SlowStart);

        est.update(false);
        assert!((est.estimate_kbps() - 2_000.0).abs() < f64::EPSILON);
        est.update(false);
        assert!((est.estimate_kbps() - 4_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_slow_start_exit() {
        let mut est = BandwidthEstimator::new();
        for _ in 0..4 {
            est.update(false);
        }
        // 1000 -> 2000 -> 4000 -> 8000 -> 16000, past the 10 Mbps handover
        assert!(est.estimate_kbps() >= SLOW_START_EXIT_KBPS);
        assert_eq!(est.phase(), EstimatorPhase::CongestionAvoidance);

        est.update(false);
        assert!((est.estimate_kbps() - 17_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_congestion_halves() {
        let mut est = BandwidthEstimator::with_initial_kbps(8_000.0);
        est.update(true);
        assert!((est.estimate_kbps() - 4_000.0).abs() < f64::EPSILON);
        assert_eq!(est.phase(), EstimatorPhase::FastRecovery);
    }

    #[test]
    fn test_floor_respected() {
        let mut est = BandwidthEstimator::new();
        for _ in 0..20 {
            est.update(true);
        }
        assert!((est.estimate_kbps() - MIN_ESTIMATE_KBPS).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ceiling_respected() {
        let mut est = BandwidthEstimator::with_initial_kbps(MAX_ESTIMATE_KBPS);
        est.update(false);
        assert!((est.estimate_kbps() - MAX_ESTIMATE_KBPS).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recovery_grows_additively() {
        let mut est = BandwidthEstimator::with_initial_kbps(20_000.0);
        est.update(true);
        assert_eq!(est.phase(), EstimatorPhase::FastRecovery);

        est.update(false);
        assert!((est.estimate_kbps() - 11_000.0).abs() < f64::EPSILON);
        assert_eq!(est.phase(), EstimatorPhase::CongestionAvoidance);
    }
}
