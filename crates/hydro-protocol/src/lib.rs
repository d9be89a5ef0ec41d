//! Hydroponics Controller Serial Protocol
//!
//! This crate provides types and utilities for talking to the Arduino-class
//! controller that drives the greenhouse sensors and lamps. The controller
//! exposes a simple newline-terminated ASCII protocol over its USB serial port.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → controller): Text commands terminated with `\n`
//! - **Responses** (controller → host): Only the sensor report line is
//!   recognized; every other line the controller prints is noise
//! - **No acknowledgements**: Control commands are fire-and-forget
//!
//! # Command Types
//!
//! - **Sensor query**: `GET_SENSORS` asks the controller to print one report line
//! - **Control commands**: `<device><action><channel>`, e.g. `lampon1`
//!
//! # Sensor Report
//!
//! ```text
//! Temp:25.3°C, Humidity:60.1%, TDS:450ppm, PH:6.8
//! ```
//!
//! # Example
//!
//! ```rust
//! use hydro_protocol::{Command, LineCodec};
//!
//! let cmd = Command::control("lamp", "on", "1").unwrap();
//! assert_eq!(LineCodec::encode(&cmd), b"lampon1\n");
//!
//! let reading = LineCodec::decode("Temp:25.3°C, Humidity:60.1%, TDS:450ppm, PH:6.8").unwrap();
//! assert_eq!(reading.ph, 6.8);
//! ```

mod codec;
mod commands;
mod error;
mod responses;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use responses::*;
