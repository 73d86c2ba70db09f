//! UDP socket wrapper for rtcast
//!
//! Wraps a blocking UDP socket with a short read timeout so the receive loop
//! stays responsive to shutdown, plus buffer tuning presets and DSCP marking.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Read timeout applied to every socket; keeps the receive loop polling
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Send/receive buffer size for the low-latency preset (256 KiB)
pub const LOW_LATENCY_BUFFER: usize = 256 * 1024;

/// Send/receive buffer size for the throughput preset (2 MiB)
pub const THROUGHPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid socket address")]
    InvalidAddress,
}

/// rtcast UDP socket
pub struct UdpTransportSocket {
    inner: Socket,
}

impl UdpTransportSocket {
    /// Bind a socket to the given address
    ///
    /// The socket is blocking with a short read timeout so a receive loop can
    /// poll for a shutdown flag between datagrams.
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;

        Ok(UdpTransportSocket { inner: socket })
    }

    /// Apply the low-latency buffer preset (small kernel queues)
    pub fn tune_low_latency(&self) -> Result<(), SocketError> {
        self.inner.set_send_buffer_size(LOW_LATENCY_BUFFER)?;
        self.inner.set_recv_buffer_size(LOW_LATENCY_BUFFER)?;
        Ok(())
    }

    /// Apply the throughput buffer preset (deep kernel queues)
    pub fn tune_throughput(&self) -> Result<(), SocketError> {
        self.inner.set_send_buffer_size(THROUGHPUT_BUFFER)?;
        self.inner.set_recv_buffer_size(THROUGHPUT_BUFFER)?;
        Ok(())
    }

    /// Set the DSCP marking on outbound packets
    ///
    /// Marking is best-effort: many platforms and unprivileged processes
    /// refuse it, so failure is logged and swallowed.
    pub fn set_tos(&self, dscp: u8) {
        let tos = (dscp as u32) << 2;
        if let Err(e) = self.inner.set_tos(tos) {
            warn!(dscp, error = %e, "failed to set DSCP marking, continuing unmarked");
        }
    }

    pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(self.inner.send_buffer_size()?)
    }

    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(self.inner.recv_buffer_size()?)
    }

    /// Local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Send a datagram to the given address
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, &target.into())?)
    }

    /// Receive one datagram, or `None` if the read timeout elapsed
    ///
    /// Interrupted syscalls are treated like timeouts so the caller's loop
    /// simply polls again.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        let uninit = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        match self.inner.recv_from(uninit) {
            Ok((n, addr)) => {
                let addr = addr.as_socket().ok_or(SocketError::InvalidAddress)?;
                Ok(Some((n, addr)))
            }
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::TimedOut
                    || e.kind() == ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    /// Clone the socket handle for use on another thread
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(UdpTransportSocket {
            inner: self.inner.try_clone()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_assigns_port() {
        let socket = UdpTransportSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(socket.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn test_buffer_tuning() {
        let socket = UdpTransportSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        socket.tune_low_latency().unwrap();
        assert!(socket.send_buffer_size().unwrap() > 0);

        socket.tune_throughput().unwrap();
        assert!(socket.recv_buffer_size().unwrap() > 0);
    }

    #[test]
    fn test_set_tos_never_panics() {
        let socket = UdpTransportSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        socket.set_tos(46);
        socket.set_tos(0);
    }

    #[test]
    fn test_send_recv_loopback() {
        let sender = UdpTransportSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let receiver = UdpTransportSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let data = b"rtcast datagram";
        sender.send_to(data, receiver_addr).unwrap();

        let mut buf = [0u8; 1024];
        for _ in 0..10 {
            if let Some((n, _)) = receiver.recv_from(&mut buf).unwrap() {
                assert_eq!(&buf[..n], data);
                return;
            }
        }
        panic!("failed to receive datagram");
    }

    #[test]
    fn test_recv_timeout_returns_none() {
        let socket = UdpTransportSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut buf = [0u8; 64];
        assert!(socket.recv_from(&mut buf).unwrap().is_none());
    }
}
