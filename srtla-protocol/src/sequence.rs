//! Sequence Number Handling
//!
//! SRT data packets carry 31-bit sequence numbers (bit 31 is the data/control
//! flag). The bonding layer compares them to clear acknowledged packets from
//! each path's in-flight log, so ordering must survive the wrap at
//! [`MAX_SEQ_NUMBER`].

use std::fmt;

/// Maximum sequence number value (31-bit: 0x7FFFFFFF)
pub const MAX_SEQ_NUMBER: u32 = 0x7FFF_FFFF;

/// Sequence number with 31-bit wraparound semantics
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    /// Create a new sequence number
    ///
    /// # Panics
    /// Panics if value exceeds MAX_SEQ_NUMBER
    pub fn new(value: u32) -> Self {
        assert!(
            value <= MAX_SEQ_NUMBER,
            "Sequence number {} exceeds maximum {}",
            value,
            MAX_SEQ_NUMBER
        );
        SeqNumber(value)
    }

    /// Create a sequence number, masking the value to 31 bits
    #[inline]
    pub fn new_unchecked(value: u32) -> Self {
        SeqNumber(value & MAX_SEQ_NUMBER)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Signed distance from this sequence number to `other`
    ///
    /// Positive when `other` is ahead. Distances are taken modulo 2^31 and
    /// folded into the half-open interval `[-2^30, 2^30)`.
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        const SPACE: i64 = MAX_SEQ_NUMBER as i64 + 1;
        const HALF: i64 = SPACE / 2;

        let diff = (other.0 as i64 - self.0 as i64).rem_euclid(SPACE);
        if diff >= HALF {
            (diff - SPACE) as i32
        } else {
            diff as i32
        }
    }

    /// Check if this sequence number precedes another
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    /// Check if this sequence number precedes or equals another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SeqNumber {
    fn from(value: u32) -> Self {
        SeqNumber::new_unchecked(value)
    }
}

impl From<SeqNumber> for u32 {
    fn from(seq: SeqNumber) -> u32 {
        seq.0
    }
}
