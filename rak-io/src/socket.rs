//! UDP socket wrapper for RakNet
//!
//! The socket is created through `socket2` so buffer sizes and address reuse
//! can be set before binding, then handed to `std::net::UdpSocket` for the
//! blocking send/receive calls used by the server loop.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Largest datagram the receive path accepts
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

impl SocketError {
    /// Whether the error only means "nothing arrived in time"
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SocketError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        )
    }
}

/// UDP endpoint of the server
pub struct RakSocket {
    inner: UdpSocket,
}

impl RakSocket {
    /// Bind a socket; IPv4 or IPv6 is chosen by the address family
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.bind(&addr.into())?;

        let socket = RakSocket {
            inner: socket.into(),
        };
        debug!(local = ?socket.local_addr().ok(), "Bound UDP socket");
        Ok(socket)
    }

    /// Set the send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_send_buffer_size(size)?;
        Ok(())
    }

    /// Set the receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Limit how long [`recv_from`](Self::recv_from) blocks
    ///
    /// A zero duration is rounded up to one millisecond, since the OS treats
    /// zero as "block forever".
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), SocketError> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.inner.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Send one datagram
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one datagram
    ///
    /// Fails with a timeout error (see [`SocketError::is_timeout`]) when
    /// nothing arrives within the read timeout.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf)?)
    }

    /// Try to clone the socket
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(RakSocket {
            inner: self.inner.try_clone()?,
        })
    }
}
