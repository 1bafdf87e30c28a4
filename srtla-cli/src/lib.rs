//! SRTLA CLI Library
//!
//! Shared functionality for the SRTLA command-line sender.

pub mod config;
pub mod stats;

pub use config::{
    parse_path_spec, AffinityConfig, Config, ConfigError, ModeConfig, PathConfig, SenderConfig,
    TimingConfig,
};
pub use stats::{display_compact_stats, display_engine_stats, format_bytes, format_bandwidth};
