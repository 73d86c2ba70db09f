//! rtcast I/O primitives
//!
//! UDP socket wrapper with buffer tuning and DSCP marking, plus the
//! monotonic timing types the transport and control loops share.

pub mod socket;
pub mod time;

pub use socket::{
    SocketError, UdpTransportSocket, LOW_LATENCY_BUFFER, RECV_TIMEOUT, THROUGHPUT_BUFFER,
};
pub use time::{Timer, Timestamp};
