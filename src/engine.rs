//! Request/response engine driving one BMS link.
//!
//! Executes one logical command against one unit at a time, collecting the
//! multi-frame answer while forwarding every decoded frame to the message
//! handler. Several units may share the bus and answer each other's polls,
//! so undecodable frames are treated as line noise, not protocol
//! violations.

use crate::error::{Error, Result};
use crate::protocol::{self, Command, Message};
use crate::transport::{MessageHandler, Transport};

/// Default ceiling on send+receive rounds per command.
pub const DEFAULT_MAX_CYCLES: usize = 5;

/// Diagnostic counters for one link. Protocol noise is absorbed silently
/// on the wire; these make it visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkStats {
    /// Frames that passed the transport filter but failed to decode.
    pub decode_failures: u64,
    /// Decoded messages that did not answer the outstanding command.
    pub unmatched_messages: u64,
    /// Extra send+receive rounds beyond the first, across all commands.
    pub retry_cycles: u64,
}

pub struct BmsEngine<T, H> {
    transport: T,
    handler: H,
    max_cycles: usize,
    stats: LinkStats,
}

impl<T: Transport, H: MessageHandler> BmsEngine<T, H> {
    pub fn new(transport: T, handler: H) -> Self {
        Self {
            transport,
            handler,
            max_cycles: DEFAULT_MAX_CYCLES,
            stats: LinkStats::default(),
        }
    }

    /// Change the retry ceiling. A ceiling of `n` allows at most `n`
    /// send+receive rounds before a command fails with [`Error::Exhausted`].
    pub fn set_max_cycles(&mut self, max_cycles: usize) {
        self.max_cycles = max_cycles.max(1);
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Execute `cmd` against unit `unit`, returning the accepted response
    /// messages in arrival order once all `cmd.response_frames` frames
    /// from that unit have been collected.
    ///
    /// Each round sends the request and receives up to
    /// `cmd.response_frames` checksum-valid frames; a round is repeated
    /// while matching frames are still outstanding, up to the retry
    /// ceiling. Transport failures abort with no partial result.
    pub fn execute(&mut self, unit: u8, cmd: Command, payload: &[u8]) -> Result<Vec<Message>> {
        let address = protocol::unit_address(unit);
        let request = protocol::encode_request(address, cmd, payload)?;
        let mut remaining = cmd.response_frames;
        let mut accepted = Vec::with_capacity(remaining);

        for cycle in 0..self.max_cycles {
            if cycle > 0 {
                self.stats.retry_cycles += 1;
                log::debug!(
                    "Retrying command 0x{:02X} to unit {} - {} frame(s) outstanding",
                    cmd.id,
                    unit,
                    remaining
                );
            }
            self.transport.send(&request)?;
            log::trace!("SEND: {:02X?}", request);

            for _ in 0..cmd.response_frames {
                let frame = self.transport.receive(&protocol::is_valid_frame)?;
                log::trace!("RECEIVED: {:02X?}", frame);

                let message = match Message::decode(&frame) {
                    Ok(message) => message,
                    Err(e) => {
                        // Line noise on a shared bus; skip, keep waiting.
                        self.stats.decode_failures += 1;
                        log::warn!("Skipping undecodable frame: {e}");
                        continue;
                    }
                };

                if message.answers(unit, cmd) {
                    remaining -= 1;
                    accepted.push(message.clone());
                } else {
                    self.stats.unmatched_messages += 1;
                }

                self.handler.handle(message);

                if remaining == 0 {
                    break;
                }
            }

            if remaining == 0 {
                log::debug!("Command 0x{:02X} to unit {} complete", cmd.id, unit);
                return Ok(accepted);
            }
        }

        Err(Error::Exhausted {
            unit,
            command: cmd.id,
            cycles: self.max_cycles,
        })
    }
}
