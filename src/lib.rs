#![cfg_attr(docsrs, feature(doc_cfg))]
//! # bmsbridge_lib
//!
//! Protocol-translation gateway library: polls Daly BMS units over a
//! byte-oriented serial link, aggregates their telemetry into one
//! battery-pack model and re-encodes it into the CAN frame burst a
//! SolArk-style inverter expects.
//!
//! The crate is built around three engines:
//! - [`protocol`]: the Daly frame codec (13 byte frames, mod-256
//!   checksum, fixed command table),
//! - [`engine`]: the blocking request/response engine with bounded retry
//!   and passive message dispatch,
//! - [`inverter`]: the pure frame-synthesis engine for the inverter link.
//!
//! ## Features
//!
//! - `default`: enables `bin-dependencies` for the `bmsbridge` gateway
//!   binary.
//! - `serialport`: synchronous serial transport using the `serialport`
//!   crate.
//! - `socketcan`: CAN transport using the `socketcan` crate (Linux).
//! - `protocol_serde`: `serde` support on the telemetry types.

/// Contains error types for the library.
mod error;
/// Defines the Daly BMS wire protocol.
pub mod protocol;

/// Aggregated battery pack model.
pub mod pack;

/// Transport and dispatcher seams.
pub mod transport;

/// Request/response engine for one BMS link.
pub mod engine;

/// Outbound frame synthesis for the inverter link.
pub mod inverter;

/// Per-unit telemetry aggregation.
pub mod aggregator;

pub use error::{Error, Result};

/// Serial transport for the BMS link.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// SocketCAN transport for the inverter link.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
#[cfg(feature = "socketcan")]
pub mod can;
