//! Merges per-unit Daly telemetry into one [`BatteryPack`] snapshot.
//!
//! The aggregator is the message handler of the BMS link: it consumes
//! every decoded message, including replies a unit gave to another
//! unit's poll, and keeps per-unit state between polling cycles.
//! Snapshots are published by replacement; a snapshot handed out is
//! never mutated afterwards.

use crate::pack::{Alarm, AlarmLevel, BatteryPack};
use crate::protocol::{Command, Message};
use crate::transport::MessageHandler;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static pack parameters that no Daly command reports: the configured
/// charge window and the identity shown to the inverter.
#[derive(Debug, Clone)]
pub struct PackConfig {
    /// Charge voltage limit in 0.1 V.
    pub max_voltage_limit: u16,
    /// Discharge voltage limit in 0.1 V.
    pub min_voltage_limit: u16,
    /// Charge current limit in 0.1 A.
    pub max_charge_current: i16,
    /// Discharge current limit in 0.1 A.
    pub max_discharge_current: i16,
    /// State of health in 0.1 %; Daly units do not report one.
    pub pack_soh: u16,
    pub manufacturer_code: String,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            max_voltage_limit: 560,
            min_voltage_limit: 480,
            max_charge_current: 1000,
            max_discharge_current: 1000,
            pack_soh: 1000,
            manufacturer_code: "DALY".to_string(),
        }
    }
}

/// What one unit has reported so far.
#[derive(Debug, Clone, Default)]
struct UnitTelemetry {
    /// Volts.
    voltage: Option<f32>,
    /// 0.1 A, positive = discharging.
    current: i16,
    /// 0.1 %.
    soc: u16,
    /// mV.
    max_cell_voltage: u16,
    /// mV.
    min_cell_voltage: u16,
    /// 0.1 degC.
    temp_max: i16,
    /// 0.1 degC.
    temp_min: i16,
    cells: u8,
    alarms: BTreeMap<Alarm, AlarmLevel>,
}

pub struct PackAggregator {
    config: PackConfig,
    units: BTreeMap<u8, UnitTelemetry>,
}

macro_rules! raise_on_bit {
    ($unit:expr, $byte:expr, $position:expr, $alarm:expr, $level:expr) => {
        if ($byte >> $position) & 1 != 0 {
            let entry = $unit.alarms.entry($alarm).or_default();
            *entry = (*entry).max($level);
        }
    };
}

impl PackAggregator {
    pub fn new(config: PackConfig) -> Self {
        Self {
            config,
            units: BTreeMap::new(),
        }
    }

    /// Number of cells a unit reported in its last status frame. Needed
    /// to size the multi-frame cell-voltage command.
    pub fn cells(&self, unit: u8) -> Option<u8> {
        self.units.get(&unit).map(|u| u.cells).filter(|c| *c > 0)
    }

    /// Build a fresh aggregated snapshot from the current per-unit state.
    pub fn snapshot(&self) -> Arc<BatteryPack> {
        let mut pack = BatteryPack {
            pack_soh: self.config.pack_soh,
            max_voltage_limit: self.config.max_voltage_limit,
            min_voltage_limit: self.config.min_voltage_limit,
            max_charge_current: self.config.max_charge_current,
            max_discharge_current: self.config.max_discharge_current,
            manufacturer_code: self.config.manufacturer_code.clone(),
            min_cell_voltage: u16::MAX,
            ..BatteryPack::default()
        };

        // Alarms merge at maximum severity across every unit heard from,
        // even one that has not reported telemetry yet.
        for unit in self.units.values() {
            for (&alarm, &level) in &unit.alarms {
                pack.raise_alarm(alarm, level);
            }
        }

        let reporting: Vec<&UnitTelemetry> = self
            .units
            .values()
            .filter(|u| u.voltage.is_some())
            .collect();
        if reporting.is_empty() {
            pack.min_cell_voltage = 0;
            return Arc::new(pack);
        }
        let n = reporting.len() as i32;

        let mut voltage_sum = 0.0f32;
        let mut soc_sum: u32 = 0;
        let mut temp_sum: i32 = 0;
        for unit in &reporting {
            voltage_sum += unit.voltage.unwrap_or_default();
            pack.pack_current = pack.pack_current.saturating_add(unit.current);
            soc_sum += u32::from(unit.soc);
            temp_sum += i32::from(unit.temp_max) + i32::from(unit.temp_min);
            pack.max_cell_voltage = pack.max_cell_voltage.max(unit.max_cell_voltage);
            if unit.min_cell_voltage > 0 {
                pack.min_cell_voltage = pack.min_cell_voltage.min(unit.min_cell_voltage);
            }
        }
        pack.pack_voltage = voltage_sum / n as f32;
        pack.pack_soc = (soc_sum / n as u32) as u16;
        pack.temp_average = (temp_sum / (2 * n)) as i16;
        if pack.min_cell_voltage == u16::MAX {
            pack.min_cell_voltage = 0;
        }
        Arc::new(pack)
    }

    fn apply(&mut self, message: &Message) {
        let unit = self.units.entry(message.address).or_default();
        let d = &message.payload;

        match message.command {
            Command::VOLTAGE_CURRENT_SOC => {
                // Voltage in 0.1 V, current with a 30000 offset in 0.1 A,
                // SOC in 0.1 %, all big-endian (see Daly protocol docs).
                unit.voltage = Some(u16::from_be_bytes([d[0], d[1]]) as f32 / 10.0);
                unit.current =
                    (i32::from(u16::from_be_bytes([d[4], d[5]])) - 30000) as i16;
                unit.soc = u16::from_be_bytes([d[6], d[7]]);
            }
            Command::CELL_VOLTAGE_RANGE => {
                unit.max_cell_voltage = u16::from_be_bytes([d[0], d[1]]);
                unit.min_cell_voltage = u16::from_be_bytes([d[3], d[4]]);
            }
            Command::CELL_VOLTAGES => {
                // Three cells per frame, frame number in the first
                // payload byte. Refines the 0x91 extremes with the full
                // per-cell sweep; 0x91 re-seeds them every cycle.
                for i in 0..3 {
                    let mv = u16::from_be_bytes([d[1 + 2 * i], d[2 + 2 * i]]);
                    if mv == 0 {
                        continue;
                    }
                    unit.max_cell_voltage = unit.max_cell_voltage.max(mv);
                    if unit.min_cell_voltage == 0 || mv < unit.min_cell_voltage {
                        unit.min_cell_voltage = mv;
                    }
                }
            }
            Command::TEMPERATURE_RANGE => {
                // An offset of 40 is added by the BMS to avoid negative
                // numbers; whole degrees, stored as tenths.
                unit.temp_max = (i16::from(d[0]) - 40) * 10;
                unit.temp_min = (i16::from(d[2]) - 40) * 10;
            }
            Command::STATUS => {
                unit.cells = d[0];
            }
            Command::FAILURE_FLAGS => {
                // A fresh frame replaces the previous alarm picture, so a
                // cleared fault actually clears.
                unit.alarms.clear();

                raise_on_bit!(unit, d[0], 0, Alarm::CellVoltageHigh, AlarmLevel::Warning);
                raise_on_bit!(unit, d[0], 1, Alarm::CellVoltageHigh, AlarmLevel::Alarm);
                raise_on_bit!(unit, d[0], 2, Alarm::CellVoltageLow, AlarmLevel::Warning);
                raise_on_bit!(unit, d[0], 3, Alarm::CellVoltageLow, AlarmLevel::Alarm);
                // Pack-level voltage faults have no bit of their own on
                // the inverter link.
                raise_on_bit!(unit, d[0], 4, Alarm::FailureOther, AlarmLevel::Warning);
                raise_on_bit!(unit, d[0], 5, Alarm::FailureOther, AlarmLevel::Alarm);
                raise_on_bit!(unit, d[0], 6, Alarm::FailureOther, AlarmLevel::Warning);
                raise_on_bit!(unit, d[0], 7, Alarm::FailureOther, AlarmLevel::Alarm);

                raise_on_bit!(unit, d[1], 0, Alarm::CellTemperatureHigh, AlarmLevel::Warning);
                raise_on_bit!(unit, d[1], 1, Alarm::CellTemperatureHigh, AlarmLevel::Alarm);
                raise_on_bit!(unit, d[1], 2, Alarm::CellTemperatureLow, AlarmLevel::Warning);
                raise_on_bit!(unit, d[1], 3, Alarm::CellTemperatureLow, AlarmLevel::Alarm);
                raise_on_bit!(unit, d[1], 4, Alarm::CellTemperatureHigh, AlarmLevel::Warning);
                raise_on_bit!(unit, d[1], 5, Alarm::CellTemperatureHigh, AlarmLevel::Alarm);
                raise_on_bit!(unit, d[1], 6, Alarm::CellTemperatureLow, AlarmLevel::Warning);
                raise_on_bit!(unit, d[1], 7, Alarm::CellTemperatureLow, AlarmLevel::Alarm);

                raise_on_bit!(unit, d[2], 0, Alarm::ChargeCurrentHigh, AlarmLevel::Warning);
                raise_on_bit!(unit, d[2], 1, Alarm::ChargeCurrentHigh, AlarmLevel::Alarm);
                raise_on_bit!(unit, d[2], 2, Alarm::DischargeCurrentHigh, AlarmLevel::Warning);
                raise_on_bit!(unit, d[2], 3, Alarm::DischargeCurrentHigh, AlarmLevel::Alarm);

                // Remaining flags (SOC window, voltage/temperature
                // spread, MOS and module faults) have no bit of their
                // own on the inverter link; any of them is an "other
                // failure" protection event.
                for byte in [d[2] & 0xF0, d[3], d[4], d[5]] {
                    if byte != 0 {
                        raise_unit_alarm(unit, Alarm::FailureOther, AlarmLevel::Alarm);
                    }
                }
            }
            _ => {
                log::trace!("No aggregation for command 0x{:02X}", message.command.id);
            }
        }
    }
}

fn raise_unit_alarm(unit: &mut UnitTelemetry, alarm: Alarm, level: AlarmLevel) {
    let entry = unit.alarms.entry(alarm).or_default();
    *entry = (*entry).max(level);
}

impl MessageHandler for PackAggregator {
    fn handle(&mut self, message: Message) {
        self.apply(&message);
    }
}
