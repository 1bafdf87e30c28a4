//! SRTLA Sender - bonds a local SRT stream over several network paths
//!
//! Point the local SRT caller at the printed listener port; datagrams are
//! spread over every registered path to the relay.

use clap::Parser;
use srtla_bonding::{Affinity, BondingDelegate, BondingEngine, PathStatus};
use srtla_cli::{
    display_compact_stats, display_engine_stats, parse_path_spec, Config, ModeConfig,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "srtla-send")]
#[command(about = "SRTLA multi-path bonding sender", long_about = None)]
struct Args {
    /// Relay URI (e.g. srtla://relay.example.com:5000)
    #[arg(short, long)]
    relay: Option<String>,

    /// Local address the SRT stack sends to
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Use a single connection on any interface, without registration
    #[arg(long)]
    pass_through: bool,

    /// Bonded path: <affinity>[=<device>] (cellular, wifi, wiredEthernet, any)
    #[arg(short, long)]
    path: Vec<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Print statistics on a single updating line instead of a table
    #[arg(long)]
    compact: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Delegate that logs engine events and keeps running totals
#[derive(Default)]
struct LoggingDelegate {
    sent: AtomicU64,
    received: AtomicU64,
    no_path: AtomicU64,
}

impl BondingDelegate for LoggingDelegate {
    fn listener_ready(&self, port: u16) {
        tracing::info!("Listening for SRT on port {}", port);
    }

    fn listener_error(&self) {
        tracing::error!("Local listener failed; restart the sender");
    }

    fn packet_sent(&self, _byte_count: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn packet_received(&self, _byte_count: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn no_path_available(&self) {
        // Warn on the first drop of every thousand to keep the log readable
        if self.no_path.fetch_add(1, Ordering::Relaxed) % 1000 == 0 {
            tracing::warn!("No connected path; dropping outgoing datagrams");
        }
    }

    fn path_state_changed(&self, affinity: Affinity, status: PathStatus) {
        tracing::info!("Path {} is {}", affinity, status);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&Config::example())?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            Config::from_file(path)?.sender
        }
        None => Config::default().sender,
    };

    if let Some(relay) = args.relay {
        config.relay = Some(relay);
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.pass_through {
        config.mode = ModeConfig::PassThrough;
    }
    if !args.path.is_empty() {
        config.paths = args
            .path
            .iter()
            .map(|spec| parse_path_spec(spec))
            .collect::<Result<_, _>>()?;
    }
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }

    let relay = match &config.relay {
        Some(relay) => relay.clone(),
        None => anyhow::bail!("A relay URI is required (--relay or sender.relay in the config)"),
    };

    let bonding = config.to_bonding_config()?;
    tracing::info!("SRTLA Sender starting...");
    tracing::info!("Relay: {}", relay);
    tracing::info!("Mode: {:?}", bonding.mode);
    for binding in bonding.path_bindings() {
        tracing::info!(
            "Path: {} (device: {})",
            binding.affinity,
            binding.device.as_deref().unwrap_or("default route")
        );
    }

    let delegate = Arc::new(LoggingDelegate::default());
    let engine = BondingEngine::new(bonding, delegate.clone())?;
    let relay_addr = engine.start(&relay)?;
    tracing::info!("Bonding to {}", relay_addr);

    let interval = config.stats_interval();
    loop {
        if interval.is_zero() {
            thread::sleep(Duration::from_secs(1));
            continue;
        }
        thread::sleep(interval);

        let stats = engine.stats();
        if args.compact {
            display_compact_stats(&stats);
        } else {
            display_engine_stats(&stats);
        }
        tracing::debug!(
            "Delegate totals: {} sent, {} received, {} dropped",
            delegate.sent.load(Ordering::Relaxed),
            delegate.received.load(Ordering::Relaxed),
            delegate.no_path.load(Ordering::Relaxed)
        );
    }
}
