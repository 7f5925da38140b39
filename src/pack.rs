//! Aggregated battery pack model shared between the BMS-facing and the
//! inverter-facing side.

use std::collections::BTreeMap;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

/// Alarm conditions a pack can report to the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub enum Alarm {
    CellVoltageHigh,
    CellVoltageLow,
    CellTemperatureHigh,
    CellTemperatureLow,
    DischargeCurrentHigh,
    ChargeCurrentHigh,
    FailureOther,
}

/// Severity band under which an alarm is reported. Ordered so that
/// levels from multiple units can be merged at maximum severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub enum AlarmLevel {
    #[default]
    None,
    Warning,
    Alarm,
}

/// One aggregated snapshot of telemetry across all polled battery units.
///
/// A snapshot is produced once per polling cycle and is read-only for the
/// duration of one frame-building pass; the aggregator publishes by
/// replacement, never by in-place mutation.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct BatteryPack {
    /// Pack voltage in volts.
    pub pack_voltage: f32,
    /// Pack current in 0.1 A, positive = discharging.
    pub pack_current: i16,
    /// State of charge in 0.1 %.
    pub pack_soc: u16,
    /// State of health in 0.1 %.
    pub pack_soh: u16,
    /// Average temperature in 0.1 degC.
    pub temp_average: i16,
    /// Highest single cell voltage in mV.
    pub max_cell_voltage: u16,
    /// Lowest single cell voltage in mV.
    pub min_cell_voltage: u16,
    /// Configured charge voltage limit in 0.1 V.
    pub max_voltage_limit: u16,
    /// Configured discharge voltage limit in 0.1 V.
    pub min_voltage_limit: u16,
    /// Configured charge current limit in 0.1 A.
    pub max_charge_current: i16,
    /// Configured discharge current limit in 0.1 A.
    pub max_discharge_current: i16,
    /// Manufacturer code reported on the inverter link.
    pub manufacturer_code: String,
    pub alarms: BTreeMap<Alarm, AlarmLevel>,
}

impl BatteryPack {
    /// Current level of `alarm`; unset entries read as `None`.
    pub fn alarm_level(&self, alarm: Alarm) -> AlarmLevel {
        self.alarms.get(&alarm).copied().unwrap_or_default()
    }

    /// Raise `alarm` to `level`, keeping an already higher severity.
    pub fn raise_alarm(&mut self, alarm: Alarm, level: AlarmLevel) {
        let entry = self.alarms.entry(alarm).or_default();
        *entry = (*entry).max(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_levels_are_ordered() {
        assert!(AlarmLevel::None < AlarmLevel::Warning);
        assert!(AlarmLevel::Warning < AlarmLevel::Alarm);
    }

    #[test]
    fn unset_alarm_reads_none() {
        let pack = BatteryPack::default();
        assert_eq!(pack.alarm_level(Alarm::CellVoltageHigh), AlarmLevel::None);
    }

    #[test]
    fn raise_keeps_highest_severity() {
        let mut pack = BatteryPack::default();
        pack.raise_alarm(Alarm::ChargeCurrentHigh, AlarmLevel::Alarm);
        pack.raise_alarm(Alarm::ChargeCurrentHigh, AlarmLevel::Warning);
        assert_eq!(pack.alarm_level(Alarm::ChargeCurrentHigh), AlarmLevel::Alarm);
    }
}
