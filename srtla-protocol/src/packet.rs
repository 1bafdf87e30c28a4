//! SRT Packet Classification
//!
//! The bonding layer never parses SRT payloads. It only reads the first
//! header word of each datagram to tell data packets from control packets,
//! and for data packets the sequence number used for loss inference.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0|                    Sequence Number                          |  data
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1|        Control Type         |        Subtype                |  control
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Every function here is pure and bounds-checked: buffers shorter than
//! [`HEADER_SIZE`] are rejected before any field is read.

use crate::sequence::SeqNumber;
use std::fmt;
use thiserror::Error;

/// Size of the SRT packet header in bytes (4 fields × 4 bytes each)
pub const HEADER_SIZE: usize = 16;

/// Control packet flag in the first 16-bit word
pub const CONTROL_FLAG: u16 = 0x8000;

/// Mask extracting the control type from the first 16-bit word
pub const CONTROL_TYPE_MASK: u16 = 0x7FFF;

/// Mask for sequence number value (bits 0-30)
const SEQ_MASK: u32 = 0x7FFF_FFFF;

/// Bit 31 of a NAK loss-list word marks the start of a range
const LOSS_RANGE_FLAG: u32 = 0x8000_0000;

/// Known SRT control packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ControlType {
    /// Connection handshake
    Handshake = 0,
    /// Keep-alive
    KeepAlive = 1,
    /// Acknowledgement
    Ack = 2,
    /// Negative acknowledgement (loss report)
    Nak = 3,
    /// Congestion warning
    CongestionWarning = 4,
    /// Shutdown
    Shutdown = 5,
    /// Acknowledgement of acknowledgement
    AckAck = 6,
    /// Drop request
    DropReq = 7,
    /// Peer error
    PeerError = 8,
}

impl ControlType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ControlType::Handshake),
            1 => Some(ControlType::KeepAlive),
            2 => Some(ControlType::Ack),
            3 => Some(ControlType::Nak),
            4 => Some(ControlType::CongestionWarning),
            5 => Some(ControlType::Shutdown),
            6 => Some(ControlType::AckAck),
            7 => Some(ControlType::DropReq),
            8 => Some(ControlType::PeerError),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Result of classifying a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Data packet carrying its sequence number
    Data(SeqNumber),
    /// Control packet carrying its raw 15-bit type code
    Control(u16),
}

impl PacketKind {
    /// Check if this is a data packet
    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, PacketKind::Data(_))
    }

    /// Sequence number of a data packet
    pub fn seq_number(&self) -> Option<SeqNumber> {
        match self {
            PacketKind::Data(seq) => Some(*seq),
            PacketKind::Control(_) => None,
        }
    }

    /// Known control type, `None` for data packets and unknown codes
    pub fn control_type(&self) -> Option<ControlType> {
        match self {
            PacketKind::Data(_) => None,
            PacketKind::Control(code) => ControlType::from_u16(*code),
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketKind::Data(seq) => write!(f, "Data(sn={})", seq),
            PacketKind::Control(code) => match ControlType::from_u16(*code) {
                Some(ct) => write!(f, "Control({:?})", ct),
                None => write!(f, "Control(unknown {:#06x})", code),
            },
        }
    }
}

/// Packet classification errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

#[inline]
fn check_len(packet: &[u8]) -> Result<(), PacketError> {
    if packet.len() < HEADER_SIZE {
        return Err(PacketError::TooShort {
            expected: HEADER_SIZE,
            actual: packet.len(),
        });
    }
    Ok(())
}

/// Check whether the datagram is an SRT data packet
pub fn is_data_packet(packet: &[u8]) -> Result<bool, PacketError> {
    check_len(packet)?;
    Ok(packet[0] & 0x80 == 0)
}

/// Sequence number of a data packet (bit 31 masked off)
pub fn data_sequence_number(packet: &[u8]) -> Result<SeqNumber, PacketError> {
    check_len(packet)?;
    let raw = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
    Ok(SeqNumber::new_unchecked(raw & SEQ_MASK))
}

/// Control type code of a control packet (low 15 bits of the first word)
pub fn control_type(packet: &[u8]) -> Result<u16, PacketError> {
    check_len(packet)?;
    Ok(u16::from_be_bytes([packet[0], packet[1]]) & CONTROL_TYPE_MASK)
}

/// Classify a datagram as data or control
pub fn classify(packet: &[u8]) -> Result<PacketKind, PacketError> {
    if is_data_packet(packet)? {
        Ok(PacketKind::Data(data_sequence_number(packet)?))
    } else {
        Ok(PacketKind::Control(control_type(packet)?))
    }
}

/// Build the first header word of a control packet
pub fn control_header_word(control_type: u16) -> u16 {
    CONTROL_FLAG | (control_type & CONTROL_TYPE_MASK)
}

/// Cumulative acknowledgement number carried by an SRT ACK
///
/// The first control-information word of an ACK (offset 16) is the sequence
/// number up to which the receiver has every packet. Returns `None` for
/// anything that is not an ACK with at least that word.
pub fn ack_sequence_number(packet: &[u8]) -> Option<SeqNumber> {
    match classify(packet).ok()? {
        PacketKind::Control(code) if code == ControlType::Ack.as_u16() => {}
        _ => return None,
    }
    let word = packet.get(HEADER_SIZE..HEADER_SIZE + 4)?;
    let raw = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    Some(SeqNumber::new_unchecked(raw & SEQ_MASK))
}

/// Inclusive range of lost sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossRange {
    pub first: SeqNumber,
    pub last: SeqNumber,
}

impl LossRange {
    /// Check whether `seq` falls inside the range
    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.first.le(seq) && seq.le(self.last)
    }
}

/// Decode the loss list of an SRT NAK
///
/// Single losses are one word; a word with bit 31 set opens a range closed by
/// the following word. A dangling range start is treated as a single loss.
pub fn nak_loss_ranges(packet: &[u8]) -> Vec<LossRange> {
    let is_nak = matches!(
        classify(packet),
        Ok(PacketKind::Control(code)) if code == ControlType::Nak.as_u16()
    );
    if !is_nak {
        return Vec::new();
    }

    let mut words = packet[HEADER_SIZE..]
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]));
    let mut ranges = Vec::new();

    while let Some(word) = words.next() {
        let first = SeqNumber::new_unchecked(word & SEQ_MASK);
        let last = if word & LOSS_RANGE_FLAG != 0 {
            words
                .next()
                .map(|end| SeqNumber::new_unchecked(end & SEQ_MASK))
                .unwrap_or(first)
        } else {
            first
        };
        ranges.push(LossRange { first, last });
    }

    ranges
}

/// Log a datagram's classification at debug level
pub fn log_packet(packet: &[u8], direction: &str) {
    match classify(packet) {
        Ok(PacketKind::Data(seq)) => {
            tracing::trace!("srtla: {}: Data packet SN {}", direction, seq);
        }
        Ok(PacketKind::Control(code)) => match ControlType::from_u16(code) {
            Some(ct) => tracing::trace!("srtla: {}: Control packet type {:?}", direction, ct),
            None => tracing::warn!("srtla: {}: Unknown control type {}", direction, code),
        },
        Err(e) => tracing::error!("srtla: {}: {}", direction, e),
    }
}
