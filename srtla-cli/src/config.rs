//! Configuration file support for the SRTLA sender

use serde::{Deserialize, Serialize};
use srtla_bonding::{Affinity, BondingConfig, BondingMode, PathBinding, PathTiming};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Interface affinity as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AffinityConfig {
    Cellular,
    Wifi,
    WiredEthernet,
    Any,
}

impl From<AffinityConfig> for Affinity {
    fn from(affinity: AffinityConfig) -> Self {
        match affinity {
            AffinityConfig::Cellular => Affinity::Cellular,
            AffinityConfig::Wifi => Affinity::Wifi,
            AffinityConfig::WiredEthernet => Affinity::WiredEthernet,
            AffinityConfig::Any => Affinity::Any,
        }
    }
}

/// Path configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    pub affinity: AffinityConfig,
    /// Interface to pin the path's socket to
    pub device: Option<String>,
    /// Optional local bind address
    pub bind: Option<SocketAddr>,
}

impl PathConfig {
    pub fn new(affinity: AffinityConfig) -> Self {
        PathConfig {
            affinity,
            device: None,
            bind: None,
        }
    }

    fn to_binding(&self) -> PathBinding {
        PathBinding {
            affinity: self.affinity.into(),
            device: self.device.clone(),
            bind: self.bind,
        }
    }
}

/// Bonding mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeConfig {
    #[default]
    Bonded,
    PassThrough,
}

/// Timing, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Unlimited when absent
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_keepalive_interval() -> u64 {
    1000
}

fn default_connection_timeout() -> u64 {
    4000
}

fn default_registration_timeout() -> u64 {
    4000
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    1
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            keepalive_interval_ms: default_keepalive_interval(),
            connection_timeout_ms: default_connection_timeout(),
            registration_timeout_ms: default_registration_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: None,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Sender configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Relay URI, e.g. `srtla://relay.example.com:5000`
    pub relay: Option<String>,
    /// Address the local SRT stack sends to
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub mode: ModeConfig,
    /// Statistics interval in seconds; 0 disables the table
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Paths in selection tie-break order
    #[serde(default = "default_paths")]
    pub paths: Vec<PathConfig>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn default_stats_interval() -> u64 {
    5
}

fn default_paths() -> Vec<PathConfig> {
    vec![
        PathConfig::new(AffinityConfig::Cellular),
        PathConfig::new(AffinityConfig::Wifi),
        PathConfig::new(AffinityConfig::WiredEthernet),
    ]
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            relay: None,
            listen: default_listen(),
            mode: ModeConfig::default(),
            stats_interval_secs: default_stats_interval(),
            timing: TimingConfig::default(),
            paths: default_paths(),
        }
    }
}

impl SenderConfig {
    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Build the engine configuration
    pub fn to_bonding_config(&self) -> Result<BondingConfig, ConfigError> {
        let t = &self.timing;
        let nonzero = [
            ("keepalive_interval_ms", t.keepalive_interval_ms),
            ("connection_timeout_ms", t.connection_timeout_ms),
            ("registration_timeout_ms", t.registration_timeout_ms),
            ("poll_interval_ms", t.poll_interval_ms),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
        }
        if t.connection_timeout_ms <= t.keepalive_interval_ms {
            return Err(ConfigError::Invalid(
                "connection_timeout_ms must exceed keepalive_interval_ms".to_string(),
            ));
        }
        if self.mode == ModeConfig::Bonded && self.paths.is_empty() {
            return Err(ConfigError::Invalid(
                "bonded mode needs at least one path".to_string(),
            ));
        }

        Ok(BondingConfig {
            mode: match self.mode {
                ModeConfig::Bonded => BondingMode::Bonded,
                ModeConfig::PassThrough => BondingMode::PassThrough,
            },
            paths: self.paths.iter().map(PathConfig::to_binding).collect(),
            listener_addr: self.listen,
            timing: PathTiming {
                keepalive_interval: Duration::from_millis(t.keepalive_interval_ms),
                connection_timeout: Duration::from_millis(t.connection_timeout_ms),
                registration_timeout: Duration::from_millis(t.registration_timeout_ms),
                reconnect_delay: Duration::from_millis(t.reconnect_delay_ms),
                max_reconnect_attempts: t.max_reconnect_attempts,
            },
            poll_interval: Duration::from_millis(t.poll_interval_ms),
        })
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sender: SenderConfig,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example configuration
    pub fn example() -> Self {
        Config {
            sender: SenderConfig {
                relay: Some("srtla://relay.example.com:5000".to_string()),
                paths: vec![
                    PathConfig {
                        device: Some("wwan0".to_string()),
                        ..PathConfig::new(AffinityConfig::Cellular)
                    },
                    PathConfig {
                        device: Some("wlan0".to_string()),
                        ..PathConfig::new(AffinityConfig::Wifi)
                    },
                    PathConfig {
                        device: Some("eth0".to_string()),
                        ..PathConfig::new(AffinityConfig::WiredEthernet)
                    },
                ],
                ..SenderConfig::default()
            },
        }
    }
}

/// Parse a `--path` argument: `<affinity>[=<device>]`
pub fn parse_path_spec(spec: &str) -> Result<PathConfig, ConfigError> {
    let (name, device) = match spec.split_once('=') {
        Some((name, device)) if !device.is_empty() => (name, Some(device.to_string())),
        Some(_) => return Err(ConfigError::Invalid(format!("empty device in '{}'", spec))),
        None => (spec, None),
    };

    let affinity = match name {
        "cellular" => AffinityConfig::Cellular,
        "wifi" => AffinityConfig::Wifi,
        "wiredEthernet" | "ethernet" | "wired" => AffinityConfig::WiredEthernet,
        "any" => AffinityConfig::Any,
        other => return Err(ConfigError::Invalid(format!("unknown affinity '{}'", other))),
    };

    Ok(PathConfig {
        affinity,
        device,
        bind: None,
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_round_trip() {
        let config = Config::example();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        let bonding = config.sender.to_bonding_config().unwrap();

        assert_eq!(bonding.mode, BondingMode::Bonded);
        assert_eq!(bonding.timing, PathTiming::default());
        assert_eq!(bonding.poll_interval, Duration::from_millis(1));
        assert_eq!(bonding.paths.len(), 3);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [sender]
            relay = "srtla://10.0.0.1:5000"
            mode = "pass-through"

            [sender.timing]
            reconnect_delay_ms = 2500
            max_reconnect_attempts = 3
            "#,
        )
        .unwrap();

        let bonding = config.sender.to_bonding_config().unwrap();
        assert_eq!(bonding.mode, BondingMode::PassThrough);
        assert_eq!(bonding.timing.reconnect_delay, Duration::from_millis(2500));
        assert_eq!(bonding.timing.max_reconnect_attempts, Some(3));
        assert_eq!(bonding.timing.keepalive_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_timing() {
        let mut config = SenderConfig::default();
        config.timing.keepalive_interval_ms = 0;
        assert!(matches!(
            config.to_bonding_config(),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = SenderConfig::default();
        config.timing.connection_timeout_ms = 500;
        assert!(config.to_bonding_config().is_err());
    }

    #[test]
    fn test_parse_path_spec() {
        assert_eq!(
            parse_path_spec("cellular=wwan0").unwrap(),
            PathConfig {
                affinity: AffinityConfig::Cellular,
                device: Some("wwan0".to_string()),
                bind: None,
            }
        );
        assert_eq!(
            parse_path_spec("wifi").unwrap().affinity,
            AffinityConfig::Wifi
        );
        assert!(parse_path_spec("satellite").is_err());
        assert!(parse_path_spec("wifi=").is_err());
    }
}
