//! In-flight tracking and path scoring
//!
//! Each path keeps a log of the data sequence numbers it carried that the
//! receiver has not acknowledged yet, plus a congestion window that shrinks on
//! reported losses and grows on acknowledgements. The score
//! `window * WINDOW_MULT / (in_flight + 1)` falls as in-flight packets and
//! losses rise. The extra scale keeps it strictly decreasing in the in-flight
//! count up to `PACKET_LOG_CAPACITY`, even at `WINDOW_MIN`.

use srtla_protocol::{LossRange, SeqNumber};
use std::collections::VecDeque;

/// Fixed-point scale of the window
pub const WINDOW_MULT: i64 = 1000;
pub const WINDOW_MIN: i64 = 1 * WINDOW_MULT;
pub const WINDOW_DEFAULT: i64 = 20 * WINDOW_MULT;
pub const WINDOW_MAX: i64 = 60 * WINDOW_MULT;
/// Window decrease per reported loss
pub const WINDOW_DECR: i64 = 100;
/// Window increase per acknowledged packet
pub const WINDOW_INCR: i64 = 30;

/// Most sequence numbers remembered per path; the oldest are forgotten first
pub const PACKET_LOG_CAPACITY: usize = 256;

/// Per-path in-flight log and congestion window
#[derive(Debug, Clone)]
pub struct PathWindow {
    in_flight: VecDeque<SeqNumber>,
    window: i64,
    packets_lost: u64,
    packets_acked: u64,
}

impl Default for PathWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl PathWindow {
    pub fn new() -> Self {
        PathWindow {
            in_flight: VecDeque::with_capacity(PACKET_LOG_CAPACITY),
            window: WINDOW_DEFAULT,
            packets_lost: 0,
            packets_acked: 0,
        }
    }

    /// Record a data packet sent on this path
    pub fn on_sent(&mut self, seq: SeqNumber) {
        if self.in_flight.len() >= PACKET_LOG_CAPACITY {
            self.in_flight.pop_front();
        }
        self.in_flight.push_back(seq);
    }

    /// Relay-reported receptions on this path; returns how many were in flight
    pub fn on_acked(&mut self, seqs: &[SeqNumber]) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|s| !seqs.contains(s));
        let acked = before - self.in_flight.len();

        self.packets_acked += acked as u64;
        self.window = (self.window + WINDOW_INCR * acked as i64).min(WINDOW_MAX);
        acked
    }

    /// Cumulative SRT acknowledgement: everything before `ack` arrived
    pub fn on_cumulative_ack(&mut self, ack: SeqNumber) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|s| !s.lt(ack));
        let acked = before - self.in_flight.len();

        self.packets_acked += acked as u64;
        acked
    }

    /// Receiver-reported losses; only sequence numbers this path carried count
    pub fn on_lost(&mut self, ranges: &[LossRange]) -> usize {
        let before = self.in_flight.len();
        self.in_flight
            .retain(|s| !ranges.iter().any(|r| r.contains(*s)));
        let lost = before - self.in_flight.len();

        self.packets_lost += lost as u64;
        self.window = (self.window - WINDOW_DECR * lost as i64).max(WINDOW_MIN);
        lost
    }

    /// Selection score of a connected path (always non-negative)
    pub fn score(&self) -> i64 {
        self.window * WINDOW_MULT / (self.in_flight.len() as i64 + 1)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn window(&self) -> i64 {
        self.window
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }

    pub fn packets_acked(&self) -> u64 {
        self.packets_acked
    }

    /// Forget in-flight packets and restore the default window
    ///
    /// Loss and ack totals are kept; they describe the path's lifetime.
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.window = WINDOW_DEFAULT;
    }
}
