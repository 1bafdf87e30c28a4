//! Bonded session group and statistics
//!
//! All paths of one engine register under the same group identifier so the
//! relay can join them into one stream. This module also defines the
//! statistics snapshot the worker publishes for callers.

use crate::config::Affinity;
use crate::path::{PathId, PathStatus};
use ring::rand::{SecureRandom, SystemRandom};
use srtla_protocol::{RegistrationId, GROUP_ID_LEN};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Group errors
#[derive(Error, Debug)]
pub enum GroupError {
    #[error("System random number generator failed")]
    Random,
}

/// Client-chosen half of the registration id
#[derive(Clone, PartialEq, Eq)]
pub struct GroupId([u8; GROUP_ID_LEN]);

impl GroupId {
    /// Generate a fresh group id from the system CSPRNG
    pub fn generate() -> Result<Self, GroupError> {
        let mut id = [0u8; GROUP_ID_LEN];
        SystemRandom::new()
            .fill(&mut id)
            .map_err(|_| GroupError::Random)?;
        Ok(GroupId(id))
    }

    pub fn from_bytes(bytes: [u8; GROUP_ID_LEN]) -> Self {
        GroupId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; GROUP_ID_LEN] {
        &self.0
    }

    /// Registration id sent in `reg1`
    pub fn registration_id(&self) -> RegistrationId {
        RegistrationId::from_group(&self.0)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({:02x?}..)", &self.0[..4])
    }
}

/// Statistics for one path
#[derive(Debug, Clone)]
pub struct PathStats {
    pub id: PathId,
    pub affinity: Affinity,
    pub status: PathStatus,
    /// Local address of the path's socket while it is open
    pub local_addr: Option<SocketAddr>,
    /// Selection score; `i64::MIN` unless connected
    pub score: i64,
    /// Data packets sent and not yet acknowledged
    pub in_flight: usize,
    /// Congestion window
    pub window: i64,
    /// Packets reported lost by the receiver
    pub packets_lost: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Round-trip time from the latest keepalive echo (microseconds)
    pub rtt_us: Option<u64>,
    /// Times the path was reopened after a failure
    pub reconnects: u32,
}

/// Engine-wide statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub running: bool,
    /// Port of the local listener while it is bound
    pub listener_port: Option<u16>,
    /// Relay address of the current session
    pub relay: Option<SocketAddr>,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Outgoing datagrams dropped because no path was connected
    pub dropped_no_path: u64,
    /// Outgoing datagrams the chosen path's socket refused
    pub dropped_send_failed: u64,
    /// Datagrams dropped for being too short to classify
    pub dropped_malformed: u64,
    pub paths: Vec<PathStats>,
    /// Time since the current session started
    pub uptime: Duration,
}

impl EngineStats {
    /// Number of paths currently eligible for traffic
    pub fn connected_paths(&self) -> usize {
        self.paths
            .iter()
            .filter(|p| p.status == PathStatus::Connected)
            .count()
    }

    /// Find a path by affinity
    pub fn path(&self, affinity: Affinity) -> Option<&PathStats> {
        self.paths.iter().find(|p| p.affinity == affinity)
    }
}
