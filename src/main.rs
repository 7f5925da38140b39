use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic, time::Duration};

use bmsbridge_lib::aggregator::{PackAggregator, PackConfig};
use bmsbridge_lib::engine::BmsEngine;

mod gateway;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

const fn about_text() -> &'static str {
    "BMS to inverter protocol gateway (Daly RS485 to SolArk CAN)"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
struct CliArgs {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Serial port device path of the BMS link (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    device: String,

    /// CAN interface of the inverter link (e.g., can0)
    #[arg(short, long, default_value = "can0")]
    can_interface: String,

    /// Number of battery units polled on the BMS bus (unit numbers 1..=N)
    #[arg(short, long, default_value_t = 1)]
    units: u8,

    /// Interval between polling cycles (e.g., "1s", "500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "1s")]
    interval: Duration,

    /// Timeout for serial I/O operations (e.g., "500ms", "1s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "500ms")]
    timeout: Duration,

    // Some USB - RS485 dongles requires at least 10ms to switch between TX and RX, so use a save delay between frames
    /// Delay between sending multiple commands to the BMS (e.g., "50ms", "100ms")
    /// (useful for some serial adapters that need time to switch between TX/RX)
    #[arg(value_parser = humantime::parse_duration, long, default_value = "50ms")]
    delay: Duration,

    /// Maximum send+receive rounds per command before it is reported failed
    #[arg(long, default_value_t = 5)]
    retries: usize,

    /// Charge voltage limit reported to the inverter, in volts
    #[arg(long, default_value_t = 56.0)]
    charge_voltage: f32,

    /// Discharge voltage limit reported to the inverter, in volts
    #[arg(long, default_value_t = 48.0)]
    discharge_voltage: f32,

    /// Charge current limit reported to the inverter, in amps
    #[arg(long, default_value_t = 100.0)]
    charge_current: f32,

    /// Discharge current limit reported to the inverter, in amps
    #[arg(long, default_value_t = 100.0)]
    discharge_current: f32,

    /// Manufacturer code reported to the inverter (at most 4 characters fit one frame)
    #[arg(long, default_value = "DALY")]
    manufacturer: String,
}

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut serial = bmsbridge_lib::serialport::SerialTransport::new(&args.device)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    serial.set_timeout(args.timeout)?;
    serial.set_delay(args.delay);

    let can = bmsbridge_lib::can::SocketCanTransport::new(&args.can_interface)
        .with_context(|| format!("Cannot open CAN interface '{}'", args.can_interface))?;

    let config = PackConfig {
        max_voltage_limit: (args.charge_voltage * 10.0) as u16,
        min_voltage_limit: (args.discharge_voltage * 10.0) as u16,
        max_charge_current: (args.charge_current * 10.0) as i16,
        max_discharge_current: (args.discharge_current * 10.0) as i16,
        manufacturer_code: args.manufacturer.clone(),
        ..PackConfig::default()
    };

    let mut engine = BmsEngine::new(serial, PackAggregator::new(config));
    engine.set_max_cycles(args.retries);

    let mut gateway = gateway::Gateway::new(engine, can, args.units, args.interval);
    gateway.run()
}
