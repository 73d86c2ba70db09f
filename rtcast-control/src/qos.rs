//! Packet prioritization and admission control
//!
//! Classifies outbound packets by size heuristics, maps priorities to DSCP
//! code points through a registry of traffic classes with per-class rate
//! budgets, and applies priority-scaled drop thresholds when the send queue
//! backs up.

/// Maximum tracked send queue depth
pub const MAX_QUEUE_DEPTH: usize = 1000;

/// Maximum registered traffic classes
pub const MAX_TRAFFIC_CLASSES: usize = 8;

/// Packet priority classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// DSCP code point for this class (EF, AF41, AF31, best effort)
    pub fn dscp(self) -> u8 {
        match self {
            Priority::Critical => 46,
            Priority::High => 34,
            Priority::Medium => 26,
            Priority::Low => 0,
        }
    }

    /// Queue occupancy above which this class is dropped; None = never
    fn drop_threshold(self) -> Option<usize> {
        match self {
            Priority::Critical => None,
            Priority::High => Some(MAX_QUEUE_DEPTH * 3 / 4),
            Priority::Medium => Some(MAX_QUEUE_DEPTH / 2),
            Priority::Low => Some(MAX_QUEUE_DEPTH / 4),
        }
    }
}

/// One registered traffic class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficClass {
    pub name: String,
    pub priority: Priority,
    pub dscp: u8,
    pub max_rate_kbps: u32,
    /// Token bucket depth for the rate budget, in bytes (one second's worth)
    pub bucket_size_bytes: u32,
}

/// QoS policy and traffic class registry
///
/// Ships with a default registry covering control, audio, video and keyframe
/// traffic; the send path holds queue depth and socket marking itself.
#[derive(Debug, Clone)]
pub struct QosPolicy {
    classes: Vec<TrafficClass>,
}

impl QosPolicy {
    pub fn new() -> Self {
        let mut policy = QosPolicy {
            classes: Vec::new(),
        };
        policy.register_class("Control", Priority::Low, 100);
        policy.register_class("Audio", Priority::Medium, 512);
        policy.register_class("Video", Priority::High, 10_000);
        policy.register_class("Video Keyframe", Priority::Critical, 20_000);
        policy
    }

    /// Register a traffic class with a rate budget
    ///
    /// Returns false when the registry is full. The DSCP marking follows the
    /// priority; the bucket holds one second of the budget.
    pub fn register_class(&mut self, name: &str, priority: Priority, max_rate_kbps: u32) -> bool {
        if self.classes.len() >= MAX_TRAFFIC_CLASSES {
            return false;
        }
        self.classes.push(TrafficClass {
            name: name.to_string(),
            priority,
            dscp: priority.dscp(),
            max_rate_kbps,
            bucket_size_bytes: max_rate_kbps * 125,
        });
        true
    }

    /// First registered class serving a priority
    pub fn class_for(&self, priority: Priority) -> Option<&TrafficClass> {
        self.classes.iter().find(|c| c.priority == priority)
    }

    pub fn classes(&self) -> &[TrafficClass] {
        &self.classes
    }

    /// Classify a packet by payload size
    ///
    /// There is no in-band priority field, so size stands in for content:
    /// keyframes are large, P-frames medium, audio small, control tiny.
    pub fn classify(&self, size: usize) -> Priority {
        if size > 10 * 1024 {
            Priority::Critical
        } else if size > 1024 {
            Priority::High
        } else if size > 100 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Whether a packet of this priority should be dropped at this depth
    pub fn should_drop(&self, priority: Priority, queue_depth: usize) -> bool {
        match priority.drop_threshold() {
            Some(threshold) => queue_depth > threshold,
            None => false,
        }
    }
}

impl Default for QosPolicy {
    fn default() -> Self {
        Self::new()
    }
}
