//! rtcast adaptive streaming control plane
//!
//! Network condition monitoring, AIMD capacity estimation, adaptive bitrate
//! selection, QoS classification, the receive-side jitter buffer and loss
//! recovery, all coordinated by the network optimizer. Components are
//! transport-agnostic: they consume timestamps and packet events and never
//! touch a socket.

pub mod abr;
pub mod bandwidth;
pub mod jitter;
pub mod monitor;
pub mod optimizer;
pub mod qos;
pub mod recovery;

pub use abr::{default_profiles, AbrController, AbrError, StreamProfile, SWITCH_HOLD_MS};
pub use bandwidth::{BandwidthEstimator, EstimatorPhase};
pub use jitter::{JitterBuffer, JitterStats, ReleasedPacket, JITTER_SLOTS};
pub use monitor::{CongestionLevel, NetworkConditions, NetworkMonitor, LOSS_WINDOW};
pub use optimizer::{Diagnostics, NetworkOptimizer, OptimizerEvent};
pub use qos::{Priority, QosPolicy, TrafficClass, MAX_QUEUE_DEPTH, MAX_TRAFFIC_CLASSES};
pub use recovery::{
    decode_fec_group, encode_fec_group, FecError, LossRecovery, RecoveryStrategy,
    MAX_NACK_ATTEMPTS, MAX_NACK_QUEUE,
};
