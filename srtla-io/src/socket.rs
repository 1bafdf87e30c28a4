//! UDP socket wrapper for SRTLA
//!
//! Every path and the local listener own one non-blocking UDP socket.
//! `recv_from` reports an empty read queue as `Ok(None)` so that the engine's
//! single worker can poll all sockets in turn without ever blocking.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use thiserror::Error;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,

    #[error("Socket option not supported on this platform")]
    UnsupportedOption,
}

impl SocketError {
    /// Check whether this error only means the socket is not ready
    pub fn is_would_block(&self) -> bool {
        matches!(self, SocketError::Io(e) if e.kind() == ErrorKind::WouldBlock)
    }
}

/// Non-blocking UDP socket
pub struct SrtlaSocket {
    inner: UdpSocket,
}

impl SrtlaSocket {
    /// Create a new socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let socket = Self::raw_socket(addr)?;
        socket.bind(&addr.into())?;
        Ok(SrtlaSocket {
            inner: socket.into(),
        })
    }

    /// Create a socket for talking to `remote`
    ///
    /// With `device` set the socket is pinned to that interface, so traffic
    /// follows the interface's route regardless of the default route. Without
    /// `local` the socket binds the unspecified address of the remote's family
    /// on an ephemeral port.
    pub fn bind_for_remote(
        remote: SocketAddr,
        local: Option<SocketAddr>,
        device: Option<&str>,
    ) -> Result<Self, SocketError> {
        let local = local.unwrap_or_else(|| unspecified_for(remote));
        if local.is_ipv4() != remote.is_ipv4() {
            return Err(SocketError::InvalidAddress);
        }

        let socket = Self::raw_socket(local)?;
        if let Some(device) = device {
            bind_to_device(&socket, device)?;
        }
        socket.bind(&local.into())?;

        Ok(SrtlaSocket {
            inner: socket.into(),
        })
    }

    fn raw_socket(addr: SocketAddr) -> Result<Socket, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
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

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send a datagram to the given address
    ///
    /// A full send queue surfaces as an error for which
    /// [`SocketError::is_would_block`] is true.
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive a datagram if one is queued
    ///
    /// Returns `Ok(None)` when nothing is ready.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }
}

fn unspecified_for(remote: SocketAddr) -> SocketAddr {
    let ip = match remote.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_to_device(socket: &Socket, device: &str) -> Result<(), SocketError> {
    socket.bind_device(Some(device.as_bytes()))?;
    Ok(())
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_to_device(_socket: &Socket, device: &str) -> Result<(), SocketError> {
    tracing::warn!("Binding to device {} is not supported on this platform", device);
    Err(SocketError::UnsupportedOption)
}
