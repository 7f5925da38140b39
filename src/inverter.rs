//! Outbound frame synthesis for the inverter CAN link.
//!
//! One telemetry cycle is an ordered burst of fixed-layout frames; some
//! inverters process the burst as a unit, so the order is part of the
//! contract.

use crate::pack::{Alarm, AlarmLevel, BatteryPack};

/// Length of one frame in its 16 byte wire layout.
pub const WIRE_LENGTH: usize = 16;
/// Payload bytes per frame.
pub const PAYLOAD_LENGTH: usize = 8;

pub const ID_CHARGE_DISCHARGE_LIMITS: u32 = 0x351;
pub const ID_SOC_SOH: u32 = 0x355;
pub const ID_VOLTAGE_CURRENT_TEMP: u32 = 0x356;
pub const ID_ALARMS: u32 = 0x359;
pub const ID_MANUFACTURER: u32 = 0x35E;

/// Alarm bit assignments for frame 0x359, bit 0 least significant.
///
/// The warning band for `FailureOther` reuses protection bit 11 instead
/// of a bit of its own. That matches the deployed devices' behaviour and
/// is kept on purpose; change it here if a corrected layout is ever
/// wanted.
pub const ALARM_BITS: &[(Alarm, AlarmLevel, u32)] = &[
    // protection band
    (Alarm::CellVoltageHigh, AlarmLevel::Alarm, 1),
    (Alarm::CellVoltageLow, AlarmLevel::Alarm, 2),
    (Alarm::CellTemperatureHigh, AlarmLevel::Alarm, 3),
    (Alarm::CellTemperatureLow, AlarmLevel::Alarm, 4),
    (Alarm::DischargeCurrentHigh, AlarmLevel::Alarm, 7),
    (Alarm::ChargeCurrentHigh, AlarmLevel::Alarm, 8),
    (Alarm::FailureOther, AlarmLevel::Alarm, 11),
    // warning band
    (Alarm::CellVoltageHigh, AlarmLevel::Warning, 17),
    (Alarm::CellVoltageLow, AlarmLevel::Warning, 18),
    (Alarm::CellTemperatureHigh, AlarmLevel::Warning, 19),
    (Alarm::CellTemperatureLow, AlarmLevel::Warning, 20),
    (Alarm::DischargeCurrentHigh, AlarmLevel::Warning, 23),
    (Alarm::ChargeCurrentHigh, AlarmLevel::Warning, 24),
    (Alarm::FailureOther, AlarmLevel::Warning, 11),
];

/// One outbound CAN frame before it hits the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: [u8; PAYLOAD_LENGTH],
}

impl CanFrame {
    fn new(id: u32) -> Self {
        Self {
            id,
            data: [0; PAYLOAD_LENGTH],
        }
    }

    /// Serialize into the 16 byte wire layout:
    /// `[id LE u32][len=8][flags=0][2 reserved][8 bytes payload]`.
    pub fn to_wire(&self) -> [u8; WIRE_LENGTH] {
        let mut wire = [0u8; WIRE_LENGTH];
        wire[0..4].copy_from_slice(&self.id.to_le_bytes());
        wire[4] = PAYLOAD_LENGTH as u8;
        wire[5] = 0; // flags
        // bytes 6..8 reserved
        wire[8..16].copy_from_slice(&self.data);
        wire
    }

    /// Parse the 16 byte wire layout back into id and payload.
    pub fn from_wire(wire: &[u8]) -> Option<CanFrame> {
        if wire.len() != WIRE_LENGTH {
            return None;
        }
        let id = u32::from_le_bytes([wire[0], wire[1], wire[2], wire[3]]);
        let mut data = [0u8; PAYLOAD_LENGTH];
        data.copy_from_slice(&wire[8..16]);
        Some(CanFrame { id, data })
    }
}

/// Little-endian field writer for one frame payload.
struct FieldWriter {
    frame: CanFrame,
    at: usize,
}

impl FieldWriter {
    fn new(id: u32) -> Self {
        Self {
            frame: CanFrame::new(id),
            at: 0,
        }
    }

    fn put_u16(&mut self, value: u16) -> &mut Self {
        self.frame.data[self.at..self.at + 2].copy_from_slice(&value.to_le_bytes());
        self.at += 2;
        self
    }

    fn put_i16(&mut self, value: i16) -> &mut Self {
        self.frame.data[self.at..self.at + 2].copy_from_slice(&value.to_le_bytes());
        self.at += 2;
        self
    }

    fn put_u32(&mut self, value: u32) -> &mut Self {
        self.frame.data[self.at..self.at + 4].copy_from_slice(&value.to_le_bytes());
        self.at += 4;
        self
    }

    fn remaining(&self) -> usize {
        PAYLOAD_LENGTH - self.at
    }

    fn finish(&self) -> CanFrame {
        self.frame
    }
}

/// Per-vendor synthesis of the outbound telemetry burst. Pure: sending
/// the frames is the caller's job.
pub trait InverterProtocol {
    fn build_frames(&self, pack: &BatteryPack) -> Vec<CanFrame>;
}

/// SolArk-style CAN protocol (shared by several Pylontech-compatible
/// inverters).
pub struct SolArkCan;

impl InverterProtocol for SolArkCan {
    fn build_frames(&self, pack: &BatteryPack) -> Vec<CanFrame> {
        vec![
            self.charge_discharge_limits(pack),
            self.soc_soh(pack),
            self.voltage_current_temp(pack),
            self.manufacturer(pack),
            self.alarms(pack),
        ]
    }
}

impl SolArkCan {
    // 0x351
    fn charge_discharge_limits(&self, pack: &BatteryPack) -> CanFrame {
        let mut w = FieldWriter::new(ID_CHARGE_DISCHARGE_LIMITS);
        // Charge voltage limit (0.1 V) - u16
        w.put_u16(pack.max_voltage_limit);
        // Charge current limit (0.1 A) - i16
        w.put_i16(pack.max_charge_current);
        // Discharge current limit (0.1 A) - i16
        w.put_i16(pack.max_discharge_current);
        // Discharge voltage limit (0.1 V) - u16
        w.put_u16(pack.min_voltage_limit);
        w.finish()
    }

    // 0x355
    fn soc_soh(&self, pack: &BatteryPack) -> CanFrame {
        let mut w = FieldWriter::new(ID_SOC_SOH);
        // SOC (1 %) - u16, model carries tenths
        w.put_u16(pack.pack_soc / 10);
        // SOH (1 %) - u16
        w.put_u16(pack.pack_soh / 10);
        w.finish()
    }

    // 0x356
    fn voltage_current_temp(&self, pack: &BatteryPack) -> CanFrame {
        let mut w = FieldWriter::new(ID_VOLTAGE_CURRENT_TEMP);
        // Pack voltage - u16, volts scaled by 10, truncated
        w.put_u16((pack.pack_voltage * 10.0) as u16);
        // Pack current (0.1 A) - i16
        w.put_i16(pack.pack_current);
        // Average temperature (0.1 degC) - i16
        w.put_i16(pack.temp_average);
        w.finish()
    }

    // 0x35E
    fn manufacturer(&self, pack: &BatteryPack) -> CanFrame {
        let mut w = FieldWriter::new(ID_MANUFACTURER);
        for c in pack.manufacturer_code.chars().take(8) {
            if w.remaining() < 2 {
                break;
            }
            w.put_u16(c as u16);
        }
        w.finish()
    }

    // 0x359
    fn alarms(&self, pack: &BatteryPack) -> CanFrame {
        let mut bits: u32 = 0;
        for &(alarm, level, bit) in ALARM_BITS {
            if pack.alarm_level(alarm) == level {
                bits |= 1 << bit;
            }
        }
        let mut w = FieldWriter::new(ID_ALARMS);
        w.put_u32(bits);
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pack() -> BatteryPack {
        BatteryPack {
            pack_voltage: 53.5,
            pack_current: 15,
            pack_soc: 940,
            pack_soh: 1000,
            temp_average: 220,
            max_cell_voltage: 3412,
            min_cell_voltage: 3321,
            max_voltage_limit: 560,
            min_voltage_limit: 480,
            max_charge_current: 1000,
            max_discharge_current: 1200,
            manufacturer_code: "DALY".to_string(),
            ..BatteryPack::default()
        }
    }

    #[test]
    fn frames_are_built_in_burst_order() {
        let frames = SolArkCan.build_frames(&sample_pack());
        let ids: Vec<u32> = frames.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0x351, 0x355, 0x356, 0x35E, 0x359]);
    }

    #[test]
    fn charge_discharge_limits_layout() {
        let frame = SolArkCan.charge_discharge_limits(&sample_pack());
        assert_eq!(frame.data[0..2], 560u16.to_le_bytes());
        assert_eq!(frame.data[2..4], 1000i16.to_le_bytes());
        assert_eq!(frame.data[4..6], 1200i16.to_le_bytes());
        assert_eq!(frame.data[6..8], 480u16.to_le_bytes());
    }

    #[test]
    fn soc_in_tenths_emits_whole_percent() {
        let frame = SolArkCan.soc_soh(&sample_pack());
        assert_eq!(u16::from_le_bytes([frame.data[0], frame.data[1]]), 94);
        assert_eq!(u16::from_le_bytes([frame.data[2], frame.data[3]]), 100);
    }

    #[test]
    fn pack_voltage_is_scaled_by_ten() {
        let frame = SolArkCan.voltage_current_temp(&sample_pack());
        assert_eq!(u16::from_le_bytes([frame.data[0], frame.data[1]]), 535);
        assert_eq!(i16::from_le_bytes([frame.data[2], frame.data[3]]), 15);
        assert_eq!(i16::from_le_bytes([frame.data[4], frame.data[5]]), 220);
    }

    #[test]
    fn negative_current_survives_encoding() {
        let mut pack = sample_pack();
        pack.pack_current = -87; // charging at 8.7 A
        let frame = SolArkCan.voltage_current_temp(&pack);
        assert_eq!(i16::from_le_bytes([frame.data[2], frame.data[3]]), -87);
    }

    #[test]
    fn alarm_bitfield_sets_both_bands() {
        let mut pack = sample_pack();
        pack.raise_alarm(Alarm::CellVoltageHigh, AlarmLevel::Alarm);
        pack.raise_alarm(Alarm::ChargeCurrentHigh, AlarmLevel::Warning);
        let frame = SolArkCan.alarms(&pack);
        let bits = u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]);
        assert_eq!(bits, (1 << 1) | (1 << 24));
    }

    #[test]
    fn other_failure_warning_reuses_protection_bit() {
        let mut pack = sample_pack();
        pack.raise_alarm(Alarm::FailureOther, AlarmLevel::Warning);
        let frame = SolArkCan.alarms(&pack);
        let bits = u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]);
        assert_eq!(bits, 1 << 11);
    }

    #[test]
    fn no_alarms_means_zero_bitfield() {
        let frame = SolArkCan.alarms(&sample_pack());
        assert_eq!(&frame.data[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn manufacturer_code_as_wide_chars() {
        let frame = SolArkCan.manufacturer(&sample_pack());
        assert_eq!(u16::from_le_bytes([frame.data[0], frame.data[1]]), 'D' as u16);
        assert_eq!(u16::from_le_bytes([frame.data[2], frame.data[3]]), 'A' as u16);
        assert_eq!(u16::from_le_bytes([frame.data[4], frame.data[5]]), 'L' as u16);
        assert_eq!(u16::from_le_bytes([frame.data[6], frame.data[7]]), 'Y' as u16);
    }

    #[test]
    fn long_manufacturer_code_stops_at_payload_capacity() {
        let mut pack = sample_pack();
        pack.manufacturer_code = "PYLONTECH".to_string();
        let frame = SolArkCan.manufacturer(&pack);
        assert_eq!(u16::from_le_bytes([frame.data[6], frame.data[7]]), 'O' as u16);
    }

    #[test]
    fn wire_layout_is_little_endian_with_header() {
        let frame = SolArkCan.soc_soh(&sample_pack());
        let wire = frame.to_wire();
        assert_eq!(&wire[0..4], &0x355u32.to_le_bytes());
        assert_eq!(wire[4], 8);
        assert_eq!(wire[5], 0);
        assert_eq!(&wire[6..8], &[0, 0]);
        assert_eq!(&wire[8..16], &frame.data);
        assert_eq!(CanFrame::from_wire(&wire), Some(frame));
    }

    #[test]
    fn synthesis_is_idempotent() {
        let pack = sample_pack();
        let first: Vec<[u8; WIRE_LENGTH]> = SolArkCan
            .build_frames(&pack)
            .iter()
            .map(CanFrame::to_wire)
            .collect();
        let second: Vec<[u8; WIRE_LENGTH]> = SolArkCan
            .build_frames(&pack)
            .iter()
            .map(CanFrame::to_wire)
            .collect();
        assert_eq!(first, second);
    }
}
