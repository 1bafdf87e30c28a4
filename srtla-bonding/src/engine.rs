//! Engine handle
//!
//! `BondingEngine` spawns the worker thread that owns every socket. `start`
//! and `stop` only enqueue commands, so they never block on I/O beyond the
//! host lookup `start` performs on the caller's thread.

use crate::config::BondingConfig;
use crate::coordinator::{Command, Coordinator};
use crate::delegate::BondingDelegate;
use crate::group::{EngineStats, GroupError};
use crate::uri::{RelayTarget, UriError};
use crossbeam::channel::{unbounded, Sender};
use parking_lot::RwLock;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid relay URI: {0}")]
    Uri(#[from] UriError),

    #[error("Group id generation failed: {0}")]
    Group(#[from] GroupError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Engine worker is not running")]
    WorkerGone,
}

/// Link-bonding engine
pub struct BondingEngine {
    commands: Sender<Command>,
    stats: Arc<RwLock<EngineStats>>,
    worker: Option<JoinHandle<()>>,
}

impl BondingEngine {
    /// Create the engine and spawn its worker
    ///
    /// Paths are created here; no socket is opened until [`start`](Self::start).
    pub fn new(
        config: BondingConfig,
        delegate: Arc<dyn BondingDelegate>,
    ) -> Result<Self, EngineError> {
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let coordinator = Coordinator::new(config, delegate, Arc::clone(&stats))?;
        let (commands, command_rx) = unbounded();

        let worker = thread::Builder::new()
            .name("srtla-worker".to_string())
            .spawn(move || coordinator.run(command_rx))
            .map_err(EngineError::Spawn)?;

        Ok(BondingEngine {
            commands,
            stats,
            worker: Some(worker),
        })
    }

    /// Start bonding towards the relay named by `uri`
    ///
    /// The URI's host and port are parsed and resolved here; on failure the
    /// error is logged and returned, and the engine's state is unchanged.
    /// Starting a running engine restarts it.
    pub fn start(&self, uri: &str) -> Result<SocketAddr, EngineError> {
        let relay = RelayTarget::parse(uri)
            .and_then(|target| target.resolve())
            .map_err(|e| {
                tracing::error!("Cannot start bonding: {}", e);
                EngineError::from(e)
            })?;

        self.commands
            .send(Command::Start(relay))
            .map_err(|_| EngineError::WorkerGone)?;
        Ok(relay)
    }

    /// Stop every path and the listener; harmless when already stopped
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Latest statistics published by the worker
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }
}

impl Drop for BondingEngine {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Bonding worker panicked");
            }
        }
    }
}
