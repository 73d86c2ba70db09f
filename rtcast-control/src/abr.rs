//! Adaptive bitrate control
//!
//! Picks a streaming profile from a ladder based on the bandwidth estimate.
//! Switches move at most one rung per evaluation and are rate-limited by a
//! hold interval so the encoder is never thrashed.

use tracing::info;

use crate::monitor::CongestionLevel;

/// Minimum time between profile switches, in milliseconds
pub const SWITCH_HOLD_MS: u64 = 5_000;

/// A profile steps up only when it fits in this fraction of the estimate
pub const UP_HEADROOM: f64 = 0.8;

/// A profile steps down when its bitrate exceeds the estimate times this
pub const DOWN_MARGIN: f64 = 1.2;

/// One rung of the bitrate ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProfile {
    pub name: String,
    pub bitrate_kbps: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamProfile {
    pub fn new(name: &str, bitrate_kbps: u32, width: u32, height: u32, fps: u32) -> Self {
        StreamProfile {
            name: name.to_string(),
            bitrate_kbps,
            width,
            height,
            fps,
        }
    }
}

/// Built-in ladder from audio-only up to 4K
pub fn default_profiles() -> Vec<StreamProfile> {
    vec![
        StreamProfile::new("480p30", 500, 854, 480, 30),
        StreamProfile::new("720p30", 2_500, 1280, 720, 30),
        StreamProfile::new("1080p30", 5_000, 1920, 1080, 30),
        StreamProfile::new("1080p60", 8_000, 1920, 1080, 60),
        StreamProfile::new("1440p60", 12_000, 2560, 1440, 60),
        StreamProfile::new("4K30", 25_000, 3840, 2160, 30),
    ]
}

/// Adaptive bitrate controller
#[derive(Debug, Clone)]
pub struct AbrController {
    profiles: Vec<StreamProfile>,
    current: usize,
    last_switch_ms: Option<u64>,
    switches: u64,
}

impl AbrController {
    /// Build a controller over an ascending-bitrate ladder, starting at the
    /// lowest rung. Empty ladders are rejected.
    pub fn new(profiles: Vec<StreamProfile>) -> Result<Self, AbrError> {
        if profiles.is_empty() {
            return Err(AbrError::EmptyLadder);
        }
        if profiles.windows(2).any(|w| w[0].bitrate_kbps >= w[1].bitrate_kbps) {
            return Err(AbrError::UnorderedLadder);
        }
        Ok(AbrController {
            profiles,
            current: 0,
            last_switch_ms: None,
            switches: 0,
        })
    }

    pub fn current_profile(&self) -> &StreamProfile {
        &self.profiles[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn profiles(&self) -> &[StreamProfile] {
        &self.profiles
    }

    /// Switches performed so far, by `evaluate` or manual override
    pub fn switches(&self) -> u64 {
        self.switches
    }

    /// Evaluate the ladder against a capacity estimate and congestion level
    ///
    /// Steps down when the current bitrate outruns capacity or the link is
    /// Poor or worse; steps up only with both headroom and a link at Good or
    /// better. Moves at most one rung and never switches twice within the
    /// hold interval. Returns the new profile when a switch happened.
    pub fn evaluate(
        &mut self,
        bandwidth_kbps: f64,
        congestion: CongestionLevel,
        now_ms: u64,
    ) -> Option<&StreamProfile> {
        if let Some(last) = self.last_switch_ms {
            if now_ms.saturating_sub(last) < SWITCH_HOLD_MS {
                return None;
            }
        }

        let current_bitrate = self.profiles[self.current].bitrate_kbps as f64;

        let overcommitted = current_bitrate > bandwidth_kbps * DOWN_MARGIN
            || congestion >= CongestionLevel::Poor;

        if overcommitted && self.current > 0 {
            self.current -= 1;
        } else if !overcommitted
            && self.current + 1 < self.profiles.len()
            && congestion <= CongestionLevel::Good
            && self.profiles[self.current + 1].bitrate_kbps as f64
                <= bandwidth_kbps * UP_HEADROOM
        {
            self.current += 1;
        } else {
            return None;
        }

        self.last_switch_ms = Some(now_ms);
        self.switches += 1;
        let profile = &self.profiles[self.current];
        info!(
            profile = %profile.name,
            bitrate_kbps = profile.bitrate_kbps,
            "switched stream profile"
        );
        Some(profile)
    }

    /// Jump to the profile closest to a target bitrate
    ///
    /// Used when the caller knows its capacity (a manual override), so the
    /// hold interval does not gate it; the switch still arms the hold timer.
    pub fn set_target_bitrate(&mut self, bitrate_kbps: u32, now_ms: u64) -> &StreamProfile {
        let closest = self
            .profiles
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.bitrate_kbps.abs_diff(bitrate_kbps))
            .map(|(i, _)| i)
            .unwrap_or(0);

        if closest != self.current {
            self.current = closest;
            self.last_switch_ms = Some(now_ms);
            self.switches += 1;
        }
        &self.profiles[self.current]
    }
}

/// Ladder construction errors
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AbrError {
    #[error("profile ladder is empty")]
    EmptyLadder,

    #[error("profile ladder is not strictly ascending by bitrate")]
    UnorderedLadder,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AbrController {
        AbrController::new(default_profiles()).unwrap()
    }

    #[test]
    fn test_starts_at_lowest_rung() {
        let abr = controller();
        assert_eq!(abr.current_profile().name, "480p30");
    }

    #[test]
    fn test_steps_up_with_headroom() {
        let mut abr = controller();
        // 720p30 needs 2500 kbps; 4000 * 0.8 = 3200 covers it.
        let switched = abr.evaluate(4_000.0, CongestionLevel::Excellent, 0);
        assert_eq!(switched.map(|p| p.name.as_str()), Some("720p30"));
    }

    #[test]
    fn test_single_step_per_evaluation() {
        let mut abr = controller();
        abr.evaluate(100_000.0, CongestionLevel::Excellent, 0);
        assert_eq!(abr.current_index(), 1);
    }

    #[test]
    fn test_hold_interval_blocks_consecutive_switches() {
        let mut abr = controller();
        assert!(abr.evaluate(100_000.0, CongestionLevel::Excellent, 0).is_some());
        assert!(abr
            .evaluate(100_000.0, CongestionLevel::Excellent, SWITCH_HOLD_MS - 1)
            .is_none());
        assert!(abr
            .evaluate(100_000.0, CongestionLevel::Excellent, SWITCH_HOLD_MS)
            .is_some());
        assert_eq!(abr.current_index(), 2);
    }

    #[test]
    fn test_steps_down_when_capacity_tight() {
        let mut abr = controller();
        abr.set_target_bitrate(5_000, 0);
        assert_eq!(abr.current_profile().name, "1080p30");

        // 5000 > 4000 * 1.2 = 4800, the rung outruns capacity.
        let switched = abr.evaluate(4_000.0, CongestionLevel::Good, SWITCH_HOLD_MS);
        assert_eq!(switched.map(|p| p.name.as_str()), Some("720p30"));
    }

    #[test]
    fn test_holds_rung_with_moderate_headroom() {
        let mut abr = controller();
        abr.set_target_bitrate(5_000, 0);

        // 5000 <= 5500 * 1.2 = 6600 and 8000 > 5500 * 0.8: stay put.
        assert!(abr
            .evaluate(5_500.0, CongestionLevel::Good, SWITCH_HOLD_MS)
            .is_none());
        assert_eq!(abr.current_profile().name, "1080p30");
    }

    #[test]
    fn test_fair_congestion_blocks_upgrade() {
        let mut abr = controller();
        // Plenty of measured bandwidth, but the link is only Fair.
        assert!(abr.evaluate(100_000.0, CongestionLevel::Fair, 0).is_none());
        assert_eq!(abr.current_index(), 0);
    }

    #[test]
    fn test_poor_congestion_forces_downgrade() {
        let mut abr = controller();
        abr.set_target_bitrate(5_000, 0);

        // Bandwidth alone would hold the rung; Poor congestion steps down.
        let switched = abr.evaluate(100_000.0, CongestionLevel::Poor, SWITCH_HOLD_MS);
        assert_eq!(switched.map(|p| p.name.as_str()), Some("720p30"));
    }

    #[test]
    fn test_no_oscillation_after_step_up() {
        let mut abr = controller();
        // Just enough to step up to 720p30: 2500 / 0.8 = 3125.
        assert!(abr.evaluate(3_125.0, CongestionLevel::Excellent, 0).is_some());
        // Same bandwidth must not immediately step back down:
        // 2500 <= 3125 * 1.2.
        assert!(abr
            .evaluate(3_125.0, CongestionLevel::Excellent, SWITCH_HOLD_MS)
            .is_none());
    }

    #[test]
    fn test_clamped_at_ladder_ends() {
        let mut abr = controller();
        assert!(abr.evaluate(100.0, CongestionLevel::Excellent, 0).is_none());

        abr.set_target_bitrate(25_000, 0);
        assert!(abr
            .evaluate(1_000_000.0, CongestionLevel::Excellent, SWITCH_HOLD_MS)
            .is_none());
    }

    #[test]
    fn test_switch_counter() {
        let mut abr = controller();
        assert_eq!(abr.switches(), 0);

        abr.evaluate(4_000.0, CongestionLevel::Excellent, 0);
        assert_eq!(abr.switches(), 1);

        // A held evaluation and a no-op override do not count.
        abr.evaluate(100_000.0, CongestionLevel::Excellent, 1);
        abr.set_target_bitrate(2_500, SWITCH_HOLD_MS);
        assert_eq!(abr.switches(), 1);

        abr.set_target_bitrate(12_000, SWITCH_HOLD_MS);
        assert_eq!(abr.switches(), 2);
    }

    #[test]
    fn test_set_target_snaps_closest() {
        let mut abr = controller();
        let profile = abr.set_target_bitrate(6_000, 0);
        assert_eq!(profile.name, "1080p30");

        let profile = abr.set_target_bitrate(11_000, 0);
        assert_eq!(profile.name, "1440p60");
    }

    #[test]
    fn test_ladder_validation() {
        assert_eq!(AbrController::new(vec![]).unwrap_err(), AbrError::EmptyLadder);

        let unordered = vec![
            StreamProfile::new("a", 2_000, 0, 0, 30),
            StreamProfile::new("b", 1_000, 0, 0, 30),
        ];
        assert_eq!(
            AbrController::new(unordered).unwrap_err(),
            AbrError::UnorderedLadder
        );
    }
}
