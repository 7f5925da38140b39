use anyhow::{Context, Result};
use bmsbridge_lib::aggregator::PackAggregator;
use bmsbridge_lib::engine::BmsEngine;
use bmsbridge_lib::inverter::{InverterProtocol, SolArkCan};
use bmsbridge_lib::protocol::Command;
use bmsbridge_lib::transport::{CanTransport, Transport};
use log::{debug, error, info, warn};
use std::time::Duration;

/// Read commands issued to every unit each cycle, status first so the
/// cell count is known before the cell-voltage poll is sized.
const POLL_SEQUENCE: &[Command] = &[
    Command::STATUS,
    Command::VOLTAGE_CURRENT_SOC,
    Command::CELL_VOLTAGE_RANGE,
    Command::TEMPERATURE_RANGE,
    Command::FAILURE_FLAGS,
];

const READ_PAYLOAD: [u8; 8] = [0; 8];

pub struct Gateway<T: Transport, C: CanTransport> {
    engine: BmsEngine<T, PackAggregator>,
    inverter_link: C,
    protocol: SolArkCan,
    units: u8,
    interval: Duration,
}

impl<T: Transport, C: CanTransport> Gateway<T, C> {
    pub fn new(
        engine: BmsEngine<T, PackAggregator>,
        inverter_link: C,
        units: u8,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            inverter_link,
            protocol: SolArkCan,
            units,
            interval,
        }
    }

    /// Poll every unit, publish a fresh snapshot and send the inverter
    /// burst. A failed command is logged and skipped; the remaining pack
    /// state still gets reported.
    pub fn run_cycle(&mut self) -> Result<()> {
        for unit in 1..=self.units {
            for cmd in POLL_SEQUENCE {
                if let Err(e) = self.engine.execute(unit, *cmd, &READ_PAYLOAD) {
                    warn!("Unit {unit} command 0x{:02X} failed: {e}", cmd.id);
                }
            }
            // The cell-voltage answer spans ceil(cells / 3) frames.
            if let Some(cells) = self.engine.handler().cells(unit) {
                let frames = usize::from(cells).div_ceil(3);
                let cmd = Command::CELL_VOLTAGES.with_response_frames(frames);
                if let Err(e) = self.engine.execute(unit, cmd, &READ_PAYLOAD) {
                    warn!("Unit {unit} cell voltage poll failed: {e}");
                }
            }
        }

        let pack = self.engine.handler().snapshot();
        debug!(
            "Aggregated pack: {:.1} V, {} x 0.1 A, SOC {} x 0.1 %",
            pack.pack_voltage, pack.pack_current, pack.pack_soc
        );

        for frame in self.protocol.build_frames(&pack) {
            self.inverter_link
                .send_extended(&frame.to_wire())
                .with_context(|| format!("Cannot send inverter frame 0x{:X}", frame.id))?;
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<()> {
        info!(
            "Starting gateway: {} unit(s), interval {:?}",
            self.units, self.interval
        );
        loop {
            if let Err(e) = self.run_cycle() {
                // Inverter link failures fail the cycle; the next cycle
                // retries from scratch.
                error!("Polling cycle failed: {e:#}");
            }
            let stats = self.engine.stats();
            debug!(
                "Link stats: decode_failures={} unmatched={} retry_cycles={}",
                stats.decode_failures, stats.unmatched_messages, stats.retry_cycles
            );
            std::thread::sleep(self.interval);
        }
    }
}
