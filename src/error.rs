/// Errors raised by the frame codec, the request/response engine and the
/// transport implementations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The checksum byte of a received frame does not match the mod-256 sum
    /// of the preceding bytes. The frame is discarded, never dispatched.
    #[error("checksum mismatch - calculated={calculated:02X} received={received:02X}")]
    ChecksumMismatch { calculated: u8, received: u8 },

    /// A received frame carries a command id that is not in the vendor
    /// command table.
    #[error("unknown command id 0x{0:02X}")]
    UnknownCommand(u8),

    /// A request was built with a payload that is not exactly the fixed
    /// payload width.
    #[error("invalid payload length - expected={expected} actual={actual}")]
    InvalidPayloadLength { expected: usize, actual: usize },

    /// A received frame is shorter or longer than one transport unit.
    #[error("invalid frame length - expected={expected} actual={actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    /// The retry ceiling was reached before all expected response frames
    /// for a command were collected.
    #[error("command 0x{command:02X} to unit {unit} incomplete after {cycles} request cycles")]
    Exhausted { unit: u8, command: u8, cycles: usize },

    /// Underlying link failure. Aborts the in-flight command with no
    /// partial result.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
