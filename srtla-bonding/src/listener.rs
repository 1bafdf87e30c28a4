//! Local Listener
//!
//! The UDP socket the local SRT stack talks to. Datagrams it receives go to
//! the coordinator; datagrams from the relay are written back to whichever
//! peer sent most recently.

use crate::coordinator::EngineEvent;
use bytes::Bytes;
use crossbeam::channel::Sender;
use srtla_io::{SocketError, SrtlaSocket};
use std::net::SocketAddr;

/// Most datagrams read per poll
const MAX_READS_PER_POLL: usize = 64;

/// Socket facing the local SRT stack
pub struct LocalListener {
    socket: SrtlaSocket,
    port: u16,
    peer: Option<SocketAddr>,
    events: Sender<EngineEvent>,
}

impl LocalListener {
    /// Bind the listener socket
    pub fn bind(addr: SocketAddr, events: Sender<EngineEvent>) -> Result<Self, SocketError> {
        let socket = SrtlaSocket::bind(addr)?;
        let port = socket.local_addr()?.port();

        Ok(LocalListener {
            socket,
            port,
            peer: None,
            events,
        })
    }

    /// Port the listener is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Peer that most recently sent a datagram
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Read queued datagrams and hand them to the coordinator
    ///
    /// Returns how many datagrams were read. Zero-length reads are skipped.
    pub fn poll(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let mut reads = 0;

        while reads < MAX_READS_PER_POLL {
            let (n, from) = match self.socket.recv_from(buf)? {
                Some(received) => received,
                None => break,
            };
            reads += 1;
            if n == 0 {
                continue;
            }

            if self.peer != Some(from) {
                tracing::debug!("Listener peer is now {}", from);
                self.peer = Some(from);
            }
            let _ = self
                .events
                .send(EngineEvent::LocalDatagram(Bytes::copy_from_slice(&buf[..n])));
        }

        Ok(reads)
    }

    /// Write a datagram back to the local peer
    ///
    /// Returns `Ok(false)` when no peer has sent anything yet or the socket's
    /// send queue is full.
    pub fn send_packet(&self, data: &[u8]) -> Result<bool, SocketError> {
        let peer = match self.peer {
            Some(peer) => peer,
            None => return Ok(false),
        };

        match self.socket.send_to(data, peer) {
            Ok(_) => Ok(true),
            Err(e) if e.is_would_block() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
