//! Bonding Coordinator
//!
//! Owns the local listener and the ordered path set, and runs on the engine's
//! worker thread. Outgoing datagrams go to the best connected path; incoming
//! stream datagrams from any path go to the listener's peer. SRT ACKs and NAKs
//! seen on the way back feed every path's in-flight tracking.

use crate::config::{Affinity, BondingConfig, BondingMode};
use crate::delegate::BondingDelegate;
use crate::group::{EngineStats, GroupError, GroupId};
use crate::listener::LocalListener;
use crate::path::{PathConnection, PathId, PathStatus, SendError};
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use srtla_protocol::{
    ack_sequence_number, classify, log_packet, nak_loss_ranges, ControlType, PacketKind,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest datagram the engine reads
const RECV_BUFFER_SIZE: usize = 65_536;

/// Messages from the listener and paths to the coordinator
#[derive(Debug)]
pub enum EngineEvent {
    /// Datagram from the local SRT stack
    LocalDatagram(Bytes),
    /// Stream datagram from the relay on a path
    RemoteDatagram { path: PathId, data: Bytes },
    PathStateChanged {
        path: PathId,
        affinity: Affinity,
        status: PathStatus,
    },
}

/// Commands from the engine handle to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start(SocketAddr),
    Stop,
    Shutdown,
}

/// Session counters, reset on every start
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    packets_sent: u64,
    packets_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    dropped_no_path: u64,
    dropped_send_failed: u64,
    dropped_malformed: u64,
}

/// Coordinator state, owned by the worker thread
pub struct Coordinator {
    config: BondingConfig,
    delegate: Arc<dyn BondingDelegate>,
    listener: Option<LocalListener>,
    paths: Vec<PathConnection>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    stats: Arc<RwLock<EngineStats>>,
    relay: Option<SocketAddr>,
    started_at: Option<Instant>,
    counters: Counters,
    buf: Vec<u8>,
}

impl Coordinator {
    /// Create the coordinator and its paths
    ///
    /// Paths are created in configuration order, which is also the selection
    /// tie-break order. No socket is opened until `start`.
    pub fn new(
        config: BondingConfig,
        delegate: Arc<dyn BondingDelegate>,
        stats: Arc<RwLock<EngineStats>>,
    ) -> Result<Self, GroupError> {
        let group = GroupId::generate()?;
        let (events_tx, events_rx) = unbounded();
        let pass_through = config.mode == BondingMode::PassThrough;

        let paths = config
            .path_bindings()
            .into_iter()
            .enumerate()
            .map(|(id, binding)| {
                PathConnection::new(
                    id,
                    binding,
                    config.timing,
                    pass_through,
                    group.clone(),
                    events_tx.clone(),
                )
            })
            .collect();

        Ok(Coordinator {
            config,
            delegate,
            listener: None,
            paths,
            events_tx,
            events_rx,
            stats,
            relay: None,
            started_at: None,
            counters: Counters::default(),
            buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn paths(&self) -> &[PathConnection] {
        &self.paths
    }

    pub fn listener_port(&self) -> Option<u16> {
        self.listener.as_ref().map(|l| l.port())
    }

    /// Start the listener and every path against `relay`
    ///
    /// A running session is stopped first. If the listener cannot bind the
    /// delegate is told and nothing else starts.
    pub fn start(&mut self, relay: SocketAddr, now: Instant) {
        if self.is_running() {
            tracing::info!("Restarting bonding session");
            self.stop();
        }

        let listener = match LocalListener::bind(self.config.listener_addr, self.events_tx.clone())
        {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(
                    "Failed to bind listener on {}: {}",
                    self.config.listener_addr,
                    e
                );
                self.delegate.listener_error();
                return;
            }
        };

        let port = listener.port();
        self.listener = Some(listener);
        self.relay = Some(relay);
        self.started_at = Some(now);
        self.counters = Counters::default();

        tracing::info!(
            "Bonding session to {} started ({} paths, listener port {})",
            relay,
            self.paths.len(),
            port
        );
        self.delegate.listener_ready(port);

        for path in &mut self.paths {
            path.start(relay, now);
        }
    }

    /// Stop every path and the listener; does nothing when already stopped
    pub fn stop(&mut self) {
        if !self.is_running() {
            tracing::debug!("Bonding session already stopped");
            return;
        }

        for path in &mut self.paths {
            path.stop();
        }
        self.listener = None;
        self.started_at = None;

        // Report the final state changes; queued datagrams belong to the old session
        let pending: Vec<EngineEvent> = self.events_rx.try_iter().collect();
        for event in pending {
            if let EngineEvent::PathStateChanged { affinity, status, .. } = event {
                self.delegate.path_state_changed(affinity, status);
            }
        }

        tracing::info!("Bonding session stopped");
    }

    /// One pass over every socket, timer and queued event
    ///
    /// Returns true when any datagram moved, so the caller can skip its wait.
    pub fn poll_once(&mut self, now: Instant) -> bool {
        if !self.is_running() {
            return false;
        }

        let mut reads = 0;

        if let Some(listener) = &mut self.listener {
            match listener.poll(&mut self.buf) {
                Ok(n) => reads += n,
                Err(e) => {
                    tracing::error!("Listener failed: {}", e);
                    self.listener = None;
                    self.delegate.listener_error();
                }
            }
        }

        for path in &mut self.paths {
            reads += path.poll(&mut self.buf, now);
            path.on_tick(now);
        }

        let events: Vec<EngineEvent> = self.events_rx.try_iter().collect();
        for event in events {
            self.handle_event(event, now);
        }

        reads > 0
    }

    fn handle_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::LocalDatagram(data) => self.handle_local(&data, now),
            EngineEvent::RemoteDatagram { path, data } => self.handle_remote(path, &data),
            EngineEvent::PathStateChanged {
                path,
                affinity,
                status,
            } => {
                tracing::debug!("Path {} ({}) is now {}", path, affinity, status);
                self.delegate.path_state_changed(affinity, status);
            }
        }
    }

    /// Index of the highest-scoring connected path
    ///
    /// Ties go to the path created first.
    pub fn select_path(&self) -> Option<PathId> {
        let mut best: Option<(PathId, i64)> = None;

        for path in self.paths.iter().filter(|p| p.is_connected()) {
            let score = path.score();
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((path.id(), score)),
            }
        }

        best.map(|(id, _)| id)
    }

    /// Route a datagram from the local SRT stack
    pub fn handle_local(&mut self, data: &[u8], now: Instant) {
        let kind = match classify(data) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::debug!("Dropping local datagram: {}", e);
                self.counters.dropped_malformed += 1;
                return;
            }
        };
        if let PacketKind::Control(code) = kind {
            if ControlType::from_u16(code).is_none() {
                tracing::warn!("Forwarding unknown control type {}", code);
            }
        }

        let id = match self.select_path() {
            Some(id) => id,
            None => {
                tracing::warn!("No connected path; dropping {} byte datagram", data.len());
                self.counters.dropped_no_path += 1;
                self.delegate.no_path_available();
                return;
            }
        };

        log_packet(data, "out");
        match self.paths[id].send_packet(data, now) {
            Ok(n) => {
                self.counters.packets_sent += 1;
                self.counters.bytes_sent += n as u64;
                self.delegate.packet_sent(n);
            }
            Err(SendError::WouldBlock) => {
                tracing::debug!("Path {} send queue full; dropping datagram", id);
                self.counters.dropped_send_failed += 1;
            }
            Err(e) => {
                tracing::warn!("Dropping datagram on path {}: {}", id, e);
                self.counters.dropped_send_failed += 1;
            }
        }
    }

    /// Deliver a stream datagram from the relay to the local peer
    pub fn handle_remote(&mut self, path: PathId, data: &[u8]) {
        let kind = match classify(data) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::debug!("Dropping datagram from path {}: {}", path, e);
                self.counters.dropped_malformed += 1;
                return;
            }
        };

        if let PacketKind::Control(code) = kind {
            if code == ControlType::Ack.as_u16() {
                if let Some(ack) = ack_sequence_number(data) {
                    for p in &mut self.paths {
                        p.on_srt_ack(ack);
                    }
                }
            } else if code == ControlType::Nak.as_u16() {
                let ranges = nak_loss_ranges(data);
                for p in &mut self.paths {
                    p.on_srt_nak(&ranges);
                }
            }
        }

        let listener = match &self.listener {
            Some(listener) => listener,
            None => {
                tracing::debug!("No listener; dropping datagram from path {}", path);
                return;
            }
        };

        log_packet(data, "in");
        match listener.send_packet(data) {
            Ok(true) => {
                self.counters.packets_received += 1;
                self.counters.bytes_received += data.len() as u64;
                self.delegate.packet_received(data.len());
            }
            Ok(false) => {
                tracing::debug!("No local peer yet; dropping datagram from path {}", path);
            }
            Err(e) => {
                tracing::error!("Listener send failed: {}", e);
                self.listener = None;
                self.delegate.listener_error();
            }
        }
    }

    /// Current statistics
    pub fn snapshot(&self, now: Instant) -> EngineStats {
        EngineStats {
            running: self.is_running(),
            listener_port: self.listener_port(),
            relay: self.relay.filter(|_| self.is_running()),
            packets_sent: self.counters.packets_sent,
            packets_received: self.counters.packets_received,
            bytes_sent: self.counters.bytes_sent,
            bytes_received: self.counters.bytes_received,
            dropped_no_path: self.counters.dropped_no_path,
            dropped_send_failed: self.counters.dropped_send_failed,
            dropped_malformed: self.counters.dropped_malformed,
            paths: self.paths.iter().map(|p| p.snapshot()).collect(),
            uptime: self
                .started_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default(),
        }
    }

    fn publish(&self, now: Instant) {
        *self.stats.write() = self.snapshot(now);
    }

    /// Worker loop; returns on `Shutdown` or when the handle is gone
    pub fn run(mut self, commands: Receiver<Command>) {
        let poll_interval = self.config.poll_interval;
        let mut busy = false;
        self.publish(Instant::now());

        loop {
            let command = if self.is_running() {
                let wait = if busy { Duration::ZERO } else { poll_interval };
                commands.recv_timeout(wait)
            } else {
                commands
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected)
            };

            match command {
                Ok(Command::Start(relay)) => self.start(relay, Instant::now()),
                Ok(Command::Stop) => self.stop(),
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    self.stop();
                    self.publish(Instant::now());
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            busy = self.poll_once(now);
            self.publish(now);
        }

        tracing::debug!("Bonding worker exiting");
    }
}
