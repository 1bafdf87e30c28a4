//! SRTLA I/O and Platform Abstraction
//!
//! This crate provides the non-blocking UDP sockets used by the bonding
//! engine, including binding a socket to a specific network interface, and
//! the timers that drive registration, keepalive and reconnect deadlines.

pub mod socket;
pub mod time;

pub use socket::{SocketError, SrtlaSocket};
pub use time::{Deadline, Timer, Timestamp};
