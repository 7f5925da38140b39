//! Daly BMS frame codec.
//!
//! One transport unit is a fixed 13 byte frame:
//! `[start=0xA5][address][command id][length=0x08][8 bytes payload][checksum]`
//! where the checksum is the mod-256 sum of the 12 preceding bytes.

use crate::error::{Error, Result};
use std::fmt;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

/// Length of one frame on the wire.
pub const FRAME_LENGTH: usize = 13;
/// Fixed width of the payload window.
pub const PAYLOAD_LENGTH: usize = 8;

const START_BYTE: u8 = 0xA5;
const DATA_LENGTH: u8 = 0x08;

/// Offset added to the unit number to form the request address byte.
/// A unit answers with address `request address - 0x40 + 1`, i.e. its
/// own unit number.
pub const UNIT_ADDRESS_OFFSET: u8 = 0x3F;

/// One logical request to a BMS, identified by its numeric id. Commands
/// whose payload exceeds one frame are answered by `response_frames`
/// physical frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct Command {
    pub id: u8,
    pub response_frames: usize,
}

impl Command {
    pub const VOLTAGE_CURRENT_SOC: Command = Command::new(0x90, 1);
    pub const CELL_VOLTAGE_RANGE: Command = Command::new(0x91, 1);
    pub const TEMPERATURE_RANGE: Command = Command::new(0x92, 1);
    pub const MOSFET_STATUS: Command = Command::new(0x93, 1);
    pub const STATUS: Command = Command::new(0x94, 1);
    pub const CELL_VOLTAGES: Command = Command::new(0x95, 1);
    pub const CELL_TEMPERATURES: Command = Command::new(0x96, 1);
    pub const BALANCE_STATE: Command = Command::new(0x97, 1);
    pub const FAILURE_FLAGS: Command = Command::new(0x98, 1);

    const fn new(id: u8, response_frames: usize) -> Self {
        Self {
            id,
            response_frames,
        }
    }

    /// The vendor command table, used for decode-time lookup by id.
    pub const ALL: &'static [Command] = &[
        Command::VOLTAGE_CURRENT_SOC,
        Command::CELL_VOLTAGE_RANGE,
        Command::TEMPERATURE_RANGE,
        Command::MOSFET_STATUS,
        Command::STATUS,
        Command::CELL_VOLTAGES,
        Command::CELL_TEMPERATURES,
        Command::BALANCE_STATE,
        Command::FAILURE_FLAGS,
    ];

    pub fn lookup(id: u8) -> Result<Command> {
        Command::ALL
            .iter()
            .find(|cmd| cmd.id == id)
            .copied()
            .ok_or(Error::UnknownCommand(id))
    }

    /// Derive a command instance expecting `frames` response frames, for
    /// the commands whose answer spans a cell-count dependent number of
    /// frames (0x95, 0x96).
    pub fn with_response_frames(self, frames: usize) -> Command {
        debug_assert!(frames >= 1);
        Command::new(self.id, frames.max(1))
    }
}

/// Wire address for a request to the given unit number.
pub fn unit_address(unit: u8) -> u8 {
    unit.wrapping_add(UNIT_ADDRESS_OFFSET)
}

/// Mod-256 sum of all bytes before the checksum byte.
pub fn checksum(buffer: &[u8]) -> u8 {
    let mut checksum: u8 = 0;
    for b in &buffer[0..buffer.len() - 1] {
        checksum = checksum.wrapping_add(*b);
    }
    checksum
}

fn validate_checksum(buffer: &[u8]) -> Result<()> {
    let calculated = checksum(buffer);
    let received = buffer[buffer.len() - 1];
    if received != calculated {
        log::warn!(
            "Invalid checksum - calculated={:02X?} received={:02X?} buffer={:02X?}",
            calculated,
            received,
            buffer
        );
        return Err(Error::ChecksumMismatch {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Whether `buffer` is one well-formed, checksum-valid frame. Used as the
/// transport receive predicate so that line noise is dropped before it
/// reaches the request/response engine.
pub fn is_valid_frame(buffer: &[u8]) -> bool {
    buffer.len() == FRAME_LENGTH && buffer[buffer.len() - 1] == checksum(buffer)
}

/// Encode a request frame for `address`. The payload must be exactly
/// [`PAYLOAD_LENGTH`] bytes; read commands send all zeroes.
pub fn encode_request(address: u8, cmd: Command, payload: &[u8]) -> Result<[u8; FRAME_LENGTH]> {
    if payload.len() != PAYLOAD_LENGTH {
        return Err(Error::InvalidPayloadLength {
            expected: PAYLOAD_LENGTH,
            actual: payload.len(),
        });
    }
    let mut tx_buffer = [0u8; FRAME_LENGTH];
    tx_buffer[0] = START_BYTE;
    tx_buffer[1] = address;
    tx_buffer[2] = cmd.id;
    tx_buffer[3] = DATA_LENGTH;
    tx_buffer[4..4 + PAYLOAD_LENGTH].copy_from_slice(payload);
    tx_buffer[FRAME_LENGTH - 1] = checksum(&tx_buffer);
    Ok(tx_buffer)
}

/// Decoded, protocol-agnostic view of one received frame. Immutable once
/// decoded; ownership passes from the decoder to the dispatcher.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct Message {
    pub address: u8,
    pub command: Command,
    pub payload: [u8; PAYLOAD_LENGTH],
}

impl Message {
    /// Decode and validate one received frame. Frames failing the
    /// checksum or carrying an unknown command id never become messages.
    pub fn decode(frame: &[u8]) -> Result<Message> {
        if frame.len() != FRAME_LENGTH {
            return Err(Error::InvalidFrameLength {
                expected: FRAME_LENGTH,
                actual: frame.len(),
            });
        }
        validate_checksum(frame)?;
        let command = Command::lookup(frame[2])?;
        let mut payload = [0u8; PAYLOAD_LENGTH];
        payload.copy_from_slice(&frame[4..4 + PAYLOAD_LENGTH]);
        Ok(Message {
            address: frame[1],
            command,
            payload,
        })
    }

    /// Whether this message answers `cmd` sent to `unit`.
    pub fn answers(&self, unit: u8, cmd: Command) -> bool {
        self.address == unit_address(unit).wrapping_sub(0x40).wrapping_add(1)
            && self.command.id == cmd.id
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unit {} cmd 0x{:02X} payload {:02X?}",
            self.address, self.command.id, self.payload
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_known_frame() {
        let frame = [0xA5, 0x01, 0x90, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(checksum(&frame), 0x3E);
    }

    #[test]
    fn encode_then_decode_roundtrip() {
        let payload = [1, 2, 3, 4, 5, 6, 7, 8];
        let frame = encode_request(unit_address(1), Command::STATUS, &payload).unwrap();
        assert_eq!(frame[0], 0xA5);
        assert_eq!(frame[1], 0x40);
        assert_eq!(frame[2], 0x94);
        assert_eq!(frame[3], 0x08);

        let msg = Message::decode(&frame).unwrap();
        assert_eq!(msg.address, 0x40);
        assert_eq!(msg.command.id, 0x94);
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn bit_flip_fails_checksum() {
        let frame = encode_request(unit_address(1), Command::VOLTAGE_CURRENT_SOC, &[0u8; 8]).unwrap();
        for byte in 0..FRAME_LENGTH - 1 {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(matches!(
                    Message::decode(&corrupted),
                    Err(Error::ChecksumMismatch { .. })
                ));
            }
        }
    }

    #[test]
    fn unknown_command_id_is_rejected() {
        let mut frame = [0u8; FRAME_LENGTH];
        frame[0] = 0xA5;
        frame[1] = 0x01;
        frame[2] = 0x42; // not in the command table
        frame[3] = 0x08;
        frame[FRAME_LENGTH - 1] = checksum(&frame);
        assert!(matches!(
            Message::decode(&frame),
            Err(Error::UnknownCommand(0x42))
        ));
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(matches!(
            encode_request(0x40, Command::STATUS, &[0u8; 4]),
            Err(Error::InvalidPayloadLength {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn response_matching_uses_unit_number() {
        // Unit 1 is addressed as 0x40 and answers with address byte 0x01.
        let mut frame = [0u8; FRAME_LENGTH];
        frame[0] = 0xA5;
        frame[1] = 0x01;
        frame[2] = 0x90;
        frame[3] = 0x08;
        frame[FRAME_LENGTH - 1] = checksum(&frame);
        let msg = Message::decode(&frame).unwrap();
        assert!(msg.answers(1, Command::VOLTAGE_CURRENT_SOC));
        assert!(!msg.answers(2, Command::VOLTAGE_CURRENT_SOC));
        assert!(!msg.answers(1, Command::STATUS));
    }

    #[test]
    fn command_table_lookup() {
        assert_eq!(Command::lookup(0x90).unwrap(), Command::VOLTAGE_CURRENT_SOC);
        assert!(Command::lookup(0xEE).is_err());
        for cmd in Command::ALL {
            assert!(cmd.response_frames >= 1);
        }
    }

    #[test]
    fn frame_predicate_filters_noise() {
        let frame = encode_request(0x40, Command::STATUS, &[0u8; 8]).unwrap();
        assert!(is_valid_frame(&frame));
        let mut corrupted = frame;
        corrupted[5] ^= 0x80;
        assert!(!is_valid_frame(&corrupted));
        assert!(!is_valid_frame(&frame[..12]));
    }
}
