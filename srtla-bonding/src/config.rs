//! Engine configuration
//!
//! Which paths the engine bonds over and the timing of their registration,
//! keepalive and reconnect cycles.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Network interface a path is pinned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    Cellular,
    Wifi,
    WiredEthernet,
    /// Whatever interface the default route picks (pass-through)
    Any,
}

impl Affinity {
    pub fn as_str(self) -> &'static str {
        match self {
            Affinity::Cellular => "cellular",
            Affinity::Wifi => "wifi",
            Affinity::WiredEthernet => "wiredEthernet",
            Affinity::Any => "any",
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bonding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondingMode {
    /// One connection per configured interface, registered with the relay
    Bonded,
    /// A single connection on any interface, no registration
    PassThrough,
}

/// How one path's socket is bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathBinding {
    pub affinity: Affinity,
    /// Interface name to pin the socket to (e.g. `wwan0`)
    pub device: Option<String>,
    /// Local address to bind; unspecified address of the relay's family if unset
    pub bind: Option<SocketAddr>,
}

impl PathBinding {
    pub fn new(affinity: Affinity) -> Self {
        PathBinding {
            affinity,
            device: None,
            bind: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }
}

/// Per-path timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTiming {
    /// Interval between keepalives on a connected path
    pub keepalive_interval: Duration,
    /// Silence after which a connected path is considered dead
    pub connection_timeout: Duration,
    /// Time allowed from `reg1` to `reg3`
    pub registration_timeout: Duration,
    /// Fixed delay before a failed path reopens
    pub reconnect_delay: Duration,
    /// Give up after this many consecutive reconnects; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for PathTiming {
    fn default() -> Self {
        PathTiming {
            keepalive_interval: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(4),
            registration_timeout: Duration::from_secs(4),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: None,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct BondingConfig {
    pub mode: BondingMode,
    /// Paths used in bonded mode, in selection tie-break order
    pub paths: Vec<PathBinding>,
    /// Address of the socket facing the local SRT stack
    pub listener_addr: SocketAddr,
    pub timing: PathTiming,
    /// Longest the worker sleeps when no socket has traffic
    pub poll_interval: Duration,
}

impl BondingConfig {
    /// Bonded over cellular, Wi-Fi and wired Ethernet
    pub fn bonded() -> Self {
        BondingConfig {
            mode: BondingMode::Bonded,
            paths: vec![
                PathBinding::new(Affinity::Cellular),
                PathBinding::new(Affinity::Wifi),
                PathBinding::new(Affinity::WiredEthernet),
            ],
            listener_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            timing: PathTiming::default(),
            poll_interval: Duration::from_millis(1),
        }
    }

    /// Single connection on any interface
    pub fn pass_through() -> Self {
        BondingConfig {
            mode: BondingMode::PassThrough,
            paths: Vec::new(),
            ..Self::bonded()
        }
    }

    /// Bonded over the given paths
    pub fn with_paths(paths: Vec<PathBinding>) -> Self {
        BondingConfig {
            paths,
            ..Self::bonded()
        }
    }

    /// Bindings of the paths the engine will create
    pub fn path_bindings(&self) -> Vec<PathBinding> {
        match self.mode {
            BondingMode::Bonded => self.paths.clone(),
            BondingMode::PassThrough => {
                let any = self
                    .paths
                    .iter()
                    .find(|p| p.affinity == Affinity::Any)
                    .cloned()
                    .unwrap_or_else(|| PathBinding::new(Affinity::Any));
                vec![any]
            }
        }
    }
}

impl Default for BondingConfig {
    fn default() -> Self {
        Self::bonded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bonded_order() {
        let affinities: Vec<_> = BondingConfig::bonded()
            .path_bindings()
            .into_iter()
            .map(|p| p.affinity)
            .collect();

        assert_eq!(
            affinities,
            vec![Affinity::Cellular, Affinity::Wifi, Affinity::WiredEthernet]
        );
    }

    #[test]
    fn test_pass_through_single_any() {
        let mut config = BondingConfig::pass_through();
        assert_eq!(config.path_bindings(), vec![PathBinding::new(Affinity::Any)]);

        config.paths = vec![
            PathBinding::new(Affinity::Wifi),
            PathBinding::new(Affinity::Any).with_device("eth0"),
        ];
        let bindings = config.path_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].device.as_deref(), Some("eth0"));
    }
}
