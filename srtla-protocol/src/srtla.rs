//! SRTLA Bonding Control Messages
//!
//! Messages exchanged directly between one bonded path and the relay. They
//! share the SRT control flag (`0x8000`) but use type identifiers far above
//! any SRT control type, so the two namespaces never collide.
//!
//! | Message     | Layout                                          |
//! |-------------|-------------------------------------------------|
//! | `keepalive` | type, optional u64 timestamp (µs)               |
//! | `ack`       | type, u16 padding, N × u32 sequence numbers      |
//! | `reg1`      | type, 256-byte registration id (client half)    |
//! | `reg2`      | type, 256-byte registration id (full)           |
//! | `reg3`      | type                                            |
//! | `reg_err`   | type                                            |
//! | `reg_ngp`   | type                                            |
//! | `reg_nak`   | type                                            |

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Bit marking a bonding control message
pub const SRTLA_TYPE_BIT: u16 = 0x8000;

/// Length of the registration id carried by `reg1`/`reg2`
pub const REG_ID_LEN: usize = 256;

/// Length of the client-chosen group half of the registration id
pub const GROUP_ID_LEN: usize = REG_ID_LEN / 2;

/// Size of the message type field
const TYPE_SIZE: usize = 2;

/// Size of the `ack` header (type + padding)
const ACK_HEADER_SIZE: usize = 4;

/// Bonding control message types (identifier without the type bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SrtlaType {
    KeepAlive = 0x1000,
    Ack = 0x1100,
    Reg1 = 0x1200,
    Reg2 = 0x1201,
    Reg3 = 0x1202,
    RegErr = 0x1210,
    RegNgp = 0x1211,
    RegNak = 0x1212,
}

impl SrtlaType {
    /// Decode from the on-wire 16-bit value (type bit included)
    pub fn from_wire(value: u16) -> Option<Self> {
        if value & SRTLA_TYPE_BIT == 0 {
            return None;
        }
        match value & !SRTLA_TYPE_BIT {
            0x1000 => Some(SrtlaType::KeepAlive),
            0x1100 => Some(SrtlaType::Ack),
            0x1200 => Some(SrtlaType::Reg1),
            0x1201 => Some(SrtlaType::Reg2),
            0x1202 => Some(SrtlaType::Reg3),
            0x1210 => Some(SrtlaType::RegErr),
            0x1211 => Some(SrtlaType::RegNgp),
            0x1212 => Some(SrtlaType::RegNak),
            _ => None,
        }
    }

    /// On-wire 16-bit value (type bit included)
    pub fn to_wire(self) -> u16 {
        SRTLA_TYPE_BIT | self as u16
    }

    /// Peek at a datagram and return its bonding type, if it is one
    pub fn peek(packet: &[u8]) -> Option<Self> {
        let word = packet.get(..TYPE_SIZE)?;
        Self::from_wire(u16::from_be_bytes([word[0], word[1]]))
    }

    /// Whether this message rejects a registration
    pub fn is_rejection(self) -> bool {
        matches!(self, SrtlaType::RegErr | SrtlaType::RegNgp | SrtlaType::RegNak)
    }
}

/// 256-byte registration id
///
/// The first [`GROUP_ID_LEN`] bytes identify the bonded session and are chosen
/// by the client; the relay fills the second half when it answers `reg1`.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationId([u8; REG_ID_LEN]);

impl RegistrationId {
    /// Build a `reg1` id from the session's group half
    pub fn from_group(group: &[u8; GROUP_ID_LEN]) -> Self {
        let mut id = [0u8; REG_ID_LEN];
        id[..GROUP_ID_LEN].copy_from_slice(group);
        RegistrationId(id)
    }

    /// Wrap a full 256-byte id
    pub fn from_bytes(bytes: [u8; REG_ID_LEN]) -> Self {
        RegistrationId(bytes)
    }

    /// Client-chosen group half
    pub fn group_half(&self) -> &[u8] {
        &self.0[..GROUP_ID_LEN]
    }

    /// Relay-assigned half
    pub fn server_half(&self) -> &[u8] {
        &self.0[GROUP_ID_LEN..]
    }

    /// Check whether this id belongs to the given session group
    pub fn matches_group(&self, group: &[u8; GROUP_ID_LEN]) -> bool {
        self.group_half() == group.as_slice()
    }

    pub fn as_bytes(&self) -> &[u8; REG_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first bytes of each half are enough to tell ids apart in logs
        write!(
            f,
            "RegistrationId({:02x?}..|{:02x?}..)",
            &self.0[..4],
            &self.0[GROUP_ID_LEN..GROUP_ID_LEN + 4]
        )
    }
}

/// Decoded bonding control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrtlaMessage {
    /// Keepalive, optionally carrying the sender's timestamp
    KeepAlive { timestamp_us: Option<u64> },
    /// Sequence numbers the relay received on this path
    Ack(Vec<SeqNumber>),
    Reg1(RegistrationId),
    Reg2(RegistrationId),
    Reg3,
    RegErr,
    RegNgp,
    RegNak,
}

impl SrtlaMessage {
    /// Message type
    pub fn srtla_type(&self) -> SrtlaType {
        match self {
            SrtlaMessage::KeepAlive { .. } => SrtlaType::KeepAlive,
            SrtlaMessage::Ack(_) => SrtlaType::Ack,
            SrtlaMessage::Reg1(_) => SrtlaType::Reg1,
            SrtlaMessage::Reg2(_) => SrtlaType::Reg2,
            SrtlaMessage::Reg3 => SrtlaType::Reg3,
            SrtlaMessage::RegErr => SrtlaType::RegErr,
            SrtlaMessage::RegNgp => SrtlaType::RegNgp,
            SrtlaMessage::RegNak => SrtlaType::RegNak,
        }
    }

    /// Serialize the message to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TYPE_SIZE + REG_ID_LEN);
        buf.put_u16(self.srtla_type().to_wire());

        match self {
            SrtlaMessage::KeepAlive { timestamp_us } => {
                if let Some(ts) = timestamp_us {
                    buf.put_u64(*ts);
                }
            }
            SrtlaMessage::Ack(seqs) => {
                buf.put_u16(0);
                for seq in seqs {
                    buf.put_u32(seq.as_raw());
                }
            }
            SrtlaMessage::Reg1(id) | SrtlaMessage::Reg2(id) => buf.put_slice(id.as_bytes()),
            SrtlaMessage::Reg3
            | SrtlaMessage::RegErr
            | SrtlaMessage::RegNgp
            | SrtlaMessage::RegNak => {}
        }

        buf.freeze()
    }

    /// Parse a bonding control message
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SrtlaError> {
        let srtla_type = match bytes.get(..TYPE_SIZE) {
            Some(word) => {
                let raw = u16::from_be_bytes([word[0], word[1]]);
                SrtlaType::from_wire(raw).ok_or(SrtlaError::UnknownType(raw))?
            }
            None => {
                return Err(SrtlaError::InsufficientData {
                    expected: TYPE_SIZE,
                    actual: bytes.len(),
                })
            }
        };

        let mut body = &bytes[TYPE_SIZE..];
        match srtla_type {
            SrtlaType::KeepAlive => {
                let timestamp_us = if body.remaining() >= 8 {
                    Some(body.get_u64())
                } else {
                    None
                };
                Ok(SrtlaMessage::KeepAlive { timestamp_us })
            }
            SrtlaType::Ack => {
                if bytes.len() < ACK_HEADER_SIZE {
                    return Err(SrtlaError::InsufficientData {
                        expected: ACK_HEADER_SIZE,
                        actual: bytes.len(),
                    });
                }
                let seqs = bytes[ACK_HEADER_SIZE..]
                    .chunks_exact(4)
                    .map(|w| SeqNumber::new_unchecked(u32::from_be_bytes([w[0], w[1], w[2], w[3]])))
                    .collect();
                Ok(SrtlaMessage::Ack(seqs))
            }
            SrtlaType::Reg1 | SrtlaType::Reg2 => {
                if body.remaining() < REG_ID_LEN {
                    return Err(SrtlaError::InsufficientData {
                        expected: TYPE_SIZE + REG_ID_LEN,
                        actual: bytes.len(),
                    });
                }
                let mut id = [0u8; REG_ID_LEN];
                body.copy_to_slice(&mut id);
                let id = RegistrationId::from_bytes(id);
                if srtla_type == SrtlaType::Reg1 {
                    Ok(SrtlaMessage::Reg1(id))
                } else {
                    Ok(SrtlaMessage::Reg2(id))
                }
            }
            SrtlaType::Reg3 => Ok(SrtlaMessage::Reg3),
            SrtlaType::RegErr => Ok(SrtlaMessage::RegErr),
            SrtlaType::RegNgp => Ok(SrtlaMessage::RegNgp),
            SrtlaType::RegNak => Ok(SrtlaMessage::RegNak),
        }
    }
}

/// Bonding control message parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SrtlaError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unknown SRTLA message type: {0:#06x}")]
    UnknownType(u16),
}
