//! rtcast - low-latency secure UDP streaming transport
//!
//! High-level API tying the wire protocol, crypto, I/O and adaptive control
//! crates together behind a single [`Transport`].

pub use rtcast_control as control;
pub use rtcast_crypto as crypto;
pub use rtcast_io as io;
pub use rtcast_protocol as protocol;

pub mod transport;

// Re-export commonly used types
pub use control::{NetworkMonitor, NetworkOptimizer, OptimizerEvent, StreamProfile};
pub use crypto::Identity;
pub use transport::{
    HandshakeState, Transport, TransportConfig, TransportError, TransportEvent,
    HANDSHAKE_RETRY_INTERVAL, KEEPALIVE_INTERVAL, UNRESPONSIVE_AFTER,
};
