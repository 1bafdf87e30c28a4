//! Delegate interface
//!
//! Events the engine reports to the surrounding application. Every callback
//! runs on the engine's worker thread, so implementations must return quickly
//! (update a counter, push onto a channel) and must not call back into the
//! engine synchronously.

use crate::config::Affinity;
use crate::path::PathStatus;

/// Receiver of engine telemetry and reachability events
pub trait BondingDelegate: Send + Sync {
    /// The local listener is bound and accepting datagrams on `port`
    fn listener_ready(&self, port: u16);

    /// The local listener failed; a `stop`/`start` cycle is needed
    fn listener_error(&self);

    /// A datagram of `byte_count` bytes went out on some path
    fn packet_sent(&self, byte_count: usize);

    /// A datagram of `byte_count` bytes was delivered to the local peer
    fn packet_received(&self, byte_count: usize);

    /// An outgoing datagram was dropped because no path is connected
    fn no_path_available(&self) {}

    /// A path changed registration state
    fn path_state_changed(&self, _affinity: Affinity, _status: PathStatus) {}
}

/// Delegate that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDelegate;

impl BondingDelegate for NullDelegate {
    fn listener_ready(&self, _port: u16) {}

    fn listener_error(&self) {}

    fn packet_sent(&self, _byte_count: usize) {}

    fn packet_received(&self, _byte_count: usize) {}
}
