//! SRTLA Link Bonding
//!
//! This crate fans one local SRT stream out over several interface-bound UDP
//! paths to a bonding-aware relay: path registration and keepalive, in-flight
//! scoring, per-packet path selection and the local listener that keeps the
//! bonded link transparent to the SRT stack.

pub mod config;
pub mod coordinator;
pub mod delegate;
pub mod engine;
pub mod group;
pub mod listener;
pub mod path;
pub mod uri;
pub mod window;

pub use config::{Affinity, BondingConfig, BondingMode, PathBinding, PathTiming};
pub use coordinator::{Command, Coordinator, EngineEvent};
pub use delegate::{BondingDelegate, NullDelegate};
pub use engine::{BondingEngine, EngineError};
pub use group::{EngineStats, GroupError, GroupId, PathStats};
pub use listener::LocalListener;
pub use path::{PathConnection, PathFailure, PathId, PathStatus, SendError};
pub use uri::{RelayTarget, UriError};
pub use window::PathWindow;
