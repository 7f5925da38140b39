//! Synchronous RS485 transport for the BMS link, backed by the
//! `serialport` crate.

use crate::error::{Error, Result};
use crate::protocol::FRAME_LENGTH;
use crate::transport::Transport;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

// https://minimalmodbus.readthedocs.io/en/stable/serialcommunication.html#timing-of-the-serial-communications
// minimum delay 4ms by baud rate 9600
pub const MINIMUM_DELAY: Duration = Duration::from_millis(4);

#[derive(Debug)]
pub struct SerialTransport {
    serial: Box<dyn serialport::SerialPort>,
    last_execution: Instant,
    delay: Duration,
}

impl SerialTransport {
    pub fn new(port: &str) -> Result<Self> {
        Ok(Self {
            serial: serialport::new(port, 9600)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .open()
                .map_err(io::Error::from)?,
            last_execution: Instant::now(),
            delay: MINIMUM_DELAY,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.serial
            .set_timeout(timeout)
            .map_err(io::Error::from)?;
        Ok(())
    }

    // Some USB-RS485 dongles require time to switch between TX and RX.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = Duration::max(delay, MINIMUM_DELAY);
    }

    fn await_delay(&self) {
        let last_exec_diff = Instant::now().duration_since(self.last_execution);
        if let Some(time_until_delay_reached) = self.delay.checked_sub(last_exec_diff) {
            std::thread::sleep(time_until_delay_reached);
        }
    }

    fn purge_pending(&mut self) -> Result<()> {
        // clear all incoming serial to avoid data collision
        loop {
            let pending = self.serial.bytes_to_read().map_err(io::Error::from)?;
            if pending == 0 {
                return Ok(());
            }
            log::trace!("Got {} pending bytes", pending);
            let mut buf: Vec<u8> = vec![0; 64];
            let received = self.serial.read(buf.as_mut_slice())?;
            log::trace!("Read {} pending bytes", received);
        }
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.purge_pending()?;
        self.await_delay();
        self.serial.write_all(frame).map_err(Error::from)
    }

    fn receive(&mut self, accept: &dyn Fn(&[u8]) -> bool) -> Result<Vec<u8>> {
        loop {
            let mut rx_buffer = vec![0; FRAME_LENGTH];
            self.serial.read_exact(&mut rx_buffer)?;
            self.last_execution = Instant::now();
            log::trace!("receive: {:02X?}", rx_buffer);

            if accept(&rx_buffer) {
                return Ok(rx_buffer);
            }
            // Checksum-invalid or misframed; drop and keep reading until
            // the port timeout elapses.
            log::warn!("Discarding rejected frame: {:02X?}", rx_buffer);
        }
    }
}
