//! Path Connection
//!
//! One interface-bound UDP socket in the bonded session. A path registers with
//! the relay (`reg1` → `reg2` → echoed `reg2` → `reg3`), keeps itself alive
//! while connected, and tracks the packets it carried for scoring.
//!
//! The socket lives inside the state variants that need it, so leaving a
//! state releases the socket and cancels that state's timers.

use crate::config::{Affinity, PathBinding, PathTiming};
use crate::coordinator::EngineEvent;
use crate::group::{GroupId, PathStats};
use crate::window::PathWindow;
use bytes::Bytes;
use crossbeam::channel::Sender;
use srtla_io::{Deadline, SocketError, SrtlaSocket, Timer, Timestamp};
use srtla_protocol::{
    data_sequence_number, is_data_packet, LossRange, RegistrationId, SeqNumber, SrtlaMessage,
    SrtlaType,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Index of a path in the coordinator's path set
pub type PathId = usize;

/// Most datagrams read from one socket per poll, so no path starves the others
const MAX_READS_PER_POLL: usize = 64;

/// Requested socket buffer size for path sockets; the kernel may clamp it
const PATH_SOCKET_BUFFER: usize = 1024 * 1024;

/// Externally visible registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Idle,
    Connecting,
    Registering,
    Connected,
    Error,
    Closed,
}

impl PathStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PathStatus::Idle => "idle",
            PathStatus::Connecting => "connecting",
            PathStatus::Registering => "registering",
            PathStatus::Connected => "connected",
            PathStatus::Error => "error",
            PathStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for PathStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a path left the connected/registering states
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathFailure {
    #[error("Relay rejected registration ({0:?})")]
    Rejected(SrtlaType),

    #[error("Registration timed out")]
    RegistrationTimeout,

    #[error("No traffic from relay within the connection timeout")]
    KeepaliveTimeout,

    #[error("Socket error: {0}")]
    Transport(String),
}

impl From<SocketError> for PathFailure {
    fn from(e: SocketError) -> Self {
        PathFailure::Transport(e.to_string())
    }
}

/// Errors from sending on a path
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Path is not connected")]
    NotConnected,

    #[error("Socket send queue is full")]
    WouldBlock,

    #[error("Path failed: {0}")]
    Failed(PathFailure),
}

enum PathState {
    Idle,
    /// `reg1` sent, waiting for the relay's `reg2`
    Connecting {
        socket: SrtlaSocket,
        deadline: Deadline,
    },
    /// Relay id echoed, waiting for `reg3`
    Registering {
        socket: SrtlaSocket,
        id: RegistrationId,
        deadline: Deadline,
    },
    Connected {
        socket: SrtlaSocket,
        last_received: Instant,
        keepalive: Timer,
    },
    /// Socket released; `retry_at` is `None` once reconnect attempts run out
    Error {
        cause: PathFailure,
        retry_at: Option<Instant>,
    },
    Closed,
}

impl PathState {
    fn status(&self) -> PathStatus {
        match self {
            PathState::Idle => PathStatus::Idle,
            PathState::Connecting { .. } => PathStatus::Connecting,
            PathState::Registering { .. } => PathStatus::Registering,
            PathState::Connected { .. } => PathStatus::Connected,
            PathState::Error { .. } => PathStatus::Error,
            PathState::Closed => PathStatus::Closed,
        }
    }

    fn socket(&self) -> Option<&SrtlaSocket> {
        match self {
            PathState::Connecting { socket, .. }
            | PathState::Registering { socket, .. }
            | PathState::Connected { socket, .. } => Some(socket),
            _ => None,
        }
    }
}

/// One bonded path to the relay
pub struct PathConnection {
    id: PathId,
    binding: PathBinding,
    timing: PathTiming,
    /// Pass-through paths talk plain SRT: no registration, no keepalives
    pass_through: bool,
    group: GroupId,
    relay: Option<SocketAddr>,
    state: PathState,
    window: PathWindow,
    events: Sender<EngineEvent>,
    /// Reference point for keepalive timestamps
    epoch: Timestamp,
    packets_sent: u64,
    packets_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    rtt_us: Option<u64>,
    reconnects: u32,
    /// Reconnects since the path was last connected
    attempts: u32,
}

impl PathConnection {
    pub fn new(
        id: PathId,
        binding: PathBinding,
        timing: PathTiming,
        pass_through: bool,
        group: GroupId,
        events: Sender<EngineEvent>,
    ) -> Self {
        PathConnection {
            id,
            binding,
            timing,
            pass_through,
            group,
            relay: None,
            state: PathState::Idle,
            window: PathWindow::new(),
            events,
            epoch: Timestamp::now(),
            packets_sent: 0,
            packets_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            rtt_us: None,
            reconnects: 0,
            attempts: 0,
        }
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn affinity(&self) -> Affinity {
        self.binding.affinity
    }

    pub fn status(&self) -> PathStatus {
        self.state.status()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, PathState::Connected { .. })
    }

    /// Failure that put the path into `error`, if it is there
    pub fn failure(&self) -> Option<&PathFailure> {
        match &self.state {
            PathState::Error { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Local address of the path's socket while it is open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.socket().and_then(|s| s.local_addr().ok())
    }

    /// Selection score; any connected path outranks every other path
    pub fn score(&self) -> i64 {
        if self.is_connected() {
            self.window.score()
        } else {
            i64::MIN
        }
    }

    /// Begin a session against `relay`
    pub fn start(&mut self, relay: SocketAddr, now: Instant) {
        self.relay = Some(relay);
        self.state = PathState::Idle;
        self.attempts = 0;
        self.window.reset();
        self.open(relay, now);
    }

    /// Release the socket and cancel every timer
    pub fn stop(&mut self) {
        if matches!(self.state, PathState::Closed | PathState::Idle) {
            self.state = PathState::Closed;
            return;
        }
        self.state = PathState::Closed;
        self.window.reset();
        tracing::info!("Path {} ({}) closed", self.id, self.affinity());
        self.notify();
    }

    fn open(&mut self, relay: SocketAddr, now: Instant) {
        let socket = match SrtlaSocket::bind_for_remote(
            relay,
            self.binding.bind,
            self.binding.device.as_deref(),
        ) {
            Ok(socket) => socket,
            Err(e) => return self.fail(e.into(), now),
        };
        for result in [
            socket.set_send_buffer_size(PATH_SOCKET_BUFFER),
            socket.set_recv_buffer_size(PATH_SOCKET_BUFFER),
        ] {
            if let Err(e) = result {
                tracing::debug!(
                    "Path {} ({}) kept default buffer size: {}",
                    self.id,
                    self.affinity(),
                    e
                );
            }
        }

        if self.pass_through {
            tracing::info!("Path {} ({}) open in pass-through mode", self.id, self.affinity());
            self.state = PathState::Connected {
                socket,
                last_received: now,
                keepalive: Timer::new(self.timing.keepalive_interval, now),
            };
            self.attempts = 0;
            self.notify();
            return;
        }

        let reg1 = SrtlaMessage::Reg1(self.group.registration_id()).to_bytes();
        if let Err(e) = socket.send_to(&reg1, relay) {
            return self.fail(e.into(), now);
        }

        tracing::debug!("Path {} ({}) sent reg1 to {}", self.id, self.affinity(), relay);
        self.state = PathState::Connecting {
            socket,
            deadline: Deadline::after(now, self.timing.registration_timeout),
        };
        self.notify();
    }

    /// Send a stream datagram to the relay
    ///
    /// Data packets are recorded as in flight until acknowledged.
    pub fn send_packet(&mut self, packet: &[u8], now: Instant) -> Result<usize, SendError> {
        let (socket, relay) = match (&self.state, self.relay) {
            (PathState::Connected { socket, .. }, Some(relay)) => (socket, relay),
            _ => return Err(SendError::NotConnected),
        };

        match socket.send_to(packet, relay) {
            Ok(n) => {
                self.packets_sent += 1;
                self.bytes_sent += n as u64;
                if let (Ok(true), Ok(seq)) = (is_data_packet(packet), data_sequence_number(packet)) {
                    self.window.on_sent(seq);
                }
                Ok(n)
            }
            Err(e) if e.is_would_block() => Err(SendError::WouldBlock),
            Err(e) => {
                let failure = PathFailure::from(e);
                self.fail(failure.clone(), now);
                Err(SendError::Failed(failure))
            }
        }
    }

    /// Read every datagram queued on the socket; returns how many were read
    pub fn poll(&mut self, buf: &mut [u8], now: Instant) -> usize {
        let mut reads = 0;

        while reads < MAX_READS_PER_POLL {
            let received = match self.state.socket() {
                Some(socket) => socket.recv_from(buf),
                None => break,
            };

            match received {
                Ok(Some((n, from))) => {
                    reads += 1;
                    if Some(from) != self.relay {
                        tracing::debug!("Path {}: ignoring datagram from {}", self.id, from);
                        continue;
                    }
                    self.handle_datagram(&buf[..n], now);
                }
                Ok(None) => break,
                Err(e) => {
                    self.fail(e.into(), now);
                    break;
                }
            }
        }

        reads
    }

    /// Process one datagram received from the relay
    pub fn handle_datagram(&mut self, data: &[u8], now: Instant) {
        if data.is_empty() {
            return;
        }
        if let PathState::Connected { last_received, .. } = &mut self.state {
            *last_received = now;
        }

        if !self.pass_through {
            if let Some(srtla_type) = SrtlaType::peek(data) {
                match SrtlaMessage::from_bytes(data) {
                    Ok(msg) => self.handle_srtla(msg, now),
                    Err(e) => {
                        tracing::debug!("Path {}: bad {:?} message: {}", self.id, srtla_type, e)
                    }
                }
                return;
            }
        }

        if !self.is_connected() {
            tracing::debug!(
                "Path {}: dropping {} byte datagram while {}",
                self.id,
                data.len(),
                self.status()
            );
            return;
        }

        self.packets_received += 1;
        self.bytes_received += data.len() as u64;
        let _ = self.events.send(EngineEvent::RemoteDatagram {
            path: self.id,
            data: Bytes::copy_from_slice(data),
        });
    }

    fn handle_srtla(&mut self, msg: SrtlaMessage, now: Instant) {
        match msg {
            SrtlaMessage::Reg2(id) => self.on_reg2(id, now),
            SrtlaMessage::Reg3 => self.on_reg3(now),
            SrtlaMessage::RegErr | SrtlaMessage::RegNgp | SrtlaMessage::RegNak => {
                if matches!(
                    self.state,
                    PathState::Connecting { .. }
                        | PathState::Registering { .. }
                        | PathState::Connected { .. }
                ) {
                    self.fail(PathFailure::Rejected(msg.srtla_type()), now);
                }
            }
            SrtlaMessage::KeepAlive { timestamp_us } => {
                if let Some(sent) = timestamp_us {
                    let elapsed = Timestamp::from_instant(now).as_micros_since(self.epoch);
                    self.rtt_us = Some(elapsed.saturating_sub(sent));
                }
            }
            SrtlaMessage::Ack(seqs) => {
                self.window.on_acked(&seqs);
            }
            SrtlaMessage::Reg1(_) => {
                tracing::debug!("Path {}: unexpected reg1 from relay", self.id);
            }
        }
    }

    fn on_reg2(&mut self, id: RegistrationId, now: Instant) {
        if !id.matches_group(self.group.as_bytes()) {
            tracing::warn!("Path {}: ignoring reg2 for a foreign group {:?}", self.id, id);
            return;
        }
        let relay = match self.relay {
            Some(relay) => relay,
            None => return,
        };

        let state = std::mem::replace(&mut self.state, PathState::Idle);
        let (socket, deadline, was_connecting) = match state {
            PathState::Connecting { socket, deadline } => (socket, deadline, true),
            // Relay resent reg2; echo it again if it still names our id
            PathState::Registering {
                socket,
                id: registered,
                deadline,
            } => {
                if registered != id {
                    tracing::debug!(
                        "Path {}: ignoring reg2 {:?}, registering as {:?}",
                        self.id,
                        id,
                        registered
                    );
                    self.state = PathState::Registering {
                        socket,
                        id: registered,
                        deadline,
                    };
                    return;
                }
                (socket, deadline, false)
            }
            other => {
                self.state = other;
                tracing::debug!("Path {}: reg2 ignored while {}", self.id, self.status());
                return;
            }
        };

        if let Err(e) = socket.send_to(&SrtlaMessage::Reg2(id.clone()).to_bytes(), relay) {
            return self.fail(e.into(), now);
        }

        tracing::debug!("Path {} ({}) echoed reg2 {:?}", self.id, self.affinity(), id);
        self.state = PathState::Registering {
            socket,
            id,
            deadline,
        };
        if was_connecting {
            self.notify();
        }
    }

    fn on_reg3(&mut self, now: Instant) {
        let state = std::mem::replace(&mut self.state, PathState::Idle);
        match state {
            PathState::Registering { socket, .. } => {
                self.state = PathState::Connected {
                    socket,
                    last_received: now,
                    keepalive: Timer::new(self.timing.keepalive_interval, now),
                };
                self.attempts = 0;
                tracing::info!("Path {} ({}) registered", self.id, self.affinity());
                self.notify();
            }
            other => {
                self.state = other;
                tracing::debug!("Path {}: reg3 ignored while {}", self.id, self.status());
            }
        }
    }

    /// Fire the timers of the current state
    pub fn on_tick(&mut self, now: Instant) {
        let relay = match self.relay {
            Some(relay) => relay,
            None => return,
        };

        let mut failure = None;
        let mut reopen = false;

        match &mut self.state {
            PathState::Connecting { deadline, .. } | PathState::Registering { deadline, .. } => {
                if deadline.fire(now) {
                    failure = Some(PathFailure::RegistrationTimeout);
                }
            }
            PathState::Connected {
                socket,
                last_received,
                keepalive,
            } if !self.pass_through => {
                if now.saturating_duration_since(*last_received) >= self.timing.connection_timeout {
                    failure = Some(PathFailure::KeepaliveTimeout);
                } else if keepalive.try_fire(now) {
                    let timestamp_us = Timestamp::from_instant(now).as_micros_since(self.epoch);
                    let msg = SrtlaMessage::KeepAlive {
                        timestamp_us: Some(timestamp_us),
                    };
                    if let Err(e) = socket.send_to(&msg.to_bytes(), relay) {
                        if !e.is_would_block() {
                            failure = Some(e.into());
                        }
                    }
                }
            }
            PathState::Error {
                retry_at: Some(at), ..
            } => {
                reopen = now >= *at;
            }
            _ => {}
        }

        if let Some(failure) = failure {
            self.fail(failure, now);
        } else if reopen {
            self.attempts += 1;
            self.reconnects += 1;
            tracing::info!(
                "Path {} ({}) reconnecting (attempt {})",
                self.id,
                self.affinity(),
                self.attempts
            );
            self.open(relay, now);
        }
    }

    /// Time until the next timer of the current state fires
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            PathState::Connecting { deadline, .. } | PathState::Registering { deadline, .. } => {
                deadline.remaining(now)
            }
            PathState::Connected { keepalive, .. } if !self.pass_through => {
                Some(keepalive.time_until_expiration(now))
            }
            PathState::Error {
                retry_at: Some(at), ..
            } => Some(at.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Cumulative SRT acknowledgement from the receiver
    pub fn on_srt_ack(&mut self, ack: SeqNumber) {
        self.window.on_cumulative_ack(ack);
    }

    /// Loss report from the receiver
    pub fn on_srt_nak(&mut self, ranges: &[LossRange]) {
        let lost = self.window.on_lost(ranges);
        if lost > 0 {
            tracing::trace!("Path {}: {} packets reported lost", self.id, lost);
        }
    }

    /// Move to `error`, releasing the socket
    pub fn fail(&mut self, cause: PathFailure, now: Instant) {
        if matches!(self.state, PathState::Closed) {
            return;
        }

        let retry_at = match self.timing.max_reconnect_attempts {
            Some(max) if self.attempts >= max => {
                tracing::warn!(
                    "Path {} ({}) failed: {}; giving up after {} attempts",
                    self.id,
                    self.affinity(),
                    cause,
                    self.attempts
                );
                None
            }
            _ => {
                tracing::warn!(
                    "Path {} ({}) failed: {}; retrying in {:?}",
                    self.id,
                    self.affinity(),
                    cause,
                    self.timing.reconnect_delay
                );
                Some(now + self.timing.reconnect_delay)
            }
        };

        self.window.reset();
        self.state = PathState::Error { cause, retry_at };
        self.notify();
    }

    /// Statistics snapshot
    pub fn snapshot(&self) -> PathStats {
        PathStats {
            id: self.id,
            affinity: self.affinity(),
            status: self.status(),
            local_addr: self.local_addr(),
            score: self.score(),
            in_flight: self.window.in_flight(),
            window: self.window.window(),
            packets_lost: self.window.packets_lost(),
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            rtt_us: self.rtt_us,
            reconnects: self.reconnects,
        }
    }

    fn notify(&self) {
        let _ = self.events.send(EngineEvent::PathStateChanged {
            path: self.id,
            affinity: self.affinity(),
            status: self.status(),
        });
    }
}
