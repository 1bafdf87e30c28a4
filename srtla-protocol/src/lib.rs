//! SRTLA Protocol Core
//!
//! This crate implements the wire-level pieces of SRTLA link bonding: the
//! classifier that tells SRT data packets from control packets without
//! touching their payload, 31-bit sequence numbers, and the bonding control
//! messages used to register each path with the relay.

pub mod packet;
pub mod sequence;
pub mod srtla;

pub use packet::{
    ack_sequence_number, classify, control_type, data_sequence_number, is_data_packet,
    log_packet, nak_loss_ranges, ControlType, LossRange, PacketError, PacketKind, HEADER_SIZE,
};
pub use sequence::SeqNumber;
pub use srtla::{RegistrationId, SrtlaError, SrtlaMessage, SrtlaType, GROUP_ID_LEN, REG_ID_LEN};
