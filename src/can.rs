//! SocketCAN transport for the inverter link.
//!
//! Bridges the 16 byte wire layout used by the synthesis engine to Linux
//! SocketCAN frames.

use crate::error::{Error, Result};
use crate::inverter::CanFrame;
use crate::transport::{CanTransport, Transport};
use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};
use std::io;

pub struct SocketCanTransport {
    socket: CanSocket,
}

impl SocketCanTransport {
    pub fn new(interface: &str) -> Result<Self> {
        Ok(Self {
            socket: CanSocket::open(interface)?,
        })
    }

    fn parse_wire(frame: &[u8]) -> Result<CanFrame> {
        CanFrame::from_wire(frame).ok_or_else(|| {
            Error::Transport(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a 16 byte CAN wire frame: {} bytes", frame.len()),
            ))
        })
    }

    fn write(&mut self, frame: socketcan::CanFrame) -> Result<()> {
        log::trace!("SEND CAN: {:?}", frame);
        self.socket.write_frame(&frame)?;
        Ok(())
    }
}

fn bad_id(id: u32) -> Error {
    Error::Transport(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("CAN id 0x{id:X} out of range"),
    ))
}

impl Transport for SocketCanTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let parsed = Self::parse_wire(frame)?;
        let id = u16::try_from(parsed.id)
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(|| bad_id(parsed.id))?;
        let frame =
            socketcan::CanFrame::new(id, &parsed.data).ok_or_else(|| bad_id(parsed.id))?;
        self.write(frame)
    }

    fn receive(&mut self, accept: &dyn Fn(&[u8]) -> bool) -> Result<Vec<u8>> {
        loop {
            let frame = self.socket.read_frame()?;
            let mut data = [0u8; 8];
            let len = frame.data().len().min(8);
            data[..len].copy_from_slice(&frame.data()[..len]);
            let wire = CanFrame {
                id: frame.raw_id(),
                data,
            }
            .to_wire();
            if accept(&wire) {
                return Ok(wire.to_vec());
            }
            log::trace!("Discarding rejected CAN frame id 0x{:X}", frame.raw_id());
        }
    }
}

impl CanTransport for SocketCanTransport {
    fn send_extended(&mut self, frame: &[u8]) -> Result<()> {
        let parsed = Self::parse_wire(frame)?;
        let id = ExtendedId::new(parsed.id).ok_or_else(|| bad_id(parsed.id))?;
        let frame =
            socketcan::CanFrame::new(id, &parsed.data).ok_or_else(|| bad_id(parsed.id))?;
        self.write(frame)
    }
}
