//! Narrow seams to the physical links and to the passive message consumer.

use crate::error::Result;
use crate::protocol::Message;

/// Byte-level link carrying already delimited frames.
///
/// One transport instance is owned exclusively by the polling loop of one
/// link; there is no concept of concurrent pending requests.
pub trait Transport {
    /// Block until the link accepts the frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Block until a frame arrives that `accept` approves of, discarding
    /// rejected frames. The transport's own timeout surfaces as a
    /// transport error.
    fn receive(&mut self, accept: &dyn Fn(&[u8]) -> bool) -> Result<Vec<u8>>;
}

/// A transport that can additionally carry extended-identifier CAN frames.
pub trait CanTransport: Transport {
    fn send_extended(&mut self, frame: &[u8]) -> Result<()>;
}

/// Passive consumer of every successfully decoded inbound message,
/// whether or not it satisfied the outstanding request. This is how
/// unrelated telemetry on a shared bus still gets aggregated.
pub trait MessageHandler {
    fn handle(&mut self, message: Message);
}

/// Discards every message. Useful for one-shot commands where nothing
/// aggregates the replies.
pub struct NullHandler;

impl MessageHandler for NullHandler {
    fn handle(&mut self, _message: Message) {}
}
