//! Serial link manager for the hydroponics controller.
//!
//! The controller is an Arduino-class board on a USB serial port. It answers
//! `GET_SENSORS` with a one-line report and switches lamps on
//! `<device><action><channel>` commands (see [`hydro_protocol`]).
//!
//! [`DeviceInterface`] is the entry point. It owns:
//!
//! - a [`ConnectionManager`] holding the serial handle behind one mutex,
//! - a [`CommandQueue`] that any thread may push to,
//! - a background worker that drains the queue, writes commands and parses
//!   sensor reports, retrying through link faults,
//! - a [`LatestReadingCache`] holding the last parsed reading.
//!
//! Callers never block on the controller: sensor requests return the cached
//! value immediately and the fresh one lands in the cache later.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hydro_link::{DeviceInterface, LinkConfig};
//!
//! let device = Arc::new(DeviceInterface::new(LinkConfig::default()));
//! if device.connect(None) {
//!     device.control_lamp("lamp", "on", "1");
//!     let _previous = device.request_sensor_reading();
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod port;
pub mod queue;
pub mod sim;
mod telemetry;
pub mod worker;

pub use cache::LatestReadingCache;
pub use config::{LinkConfig, DEFAULT_BAUD_RATE, DEFAULT_PORT};
pub use connection::{ConnectionInfo, ConnectionManager, ConnectionState, OpenOutcome};
pub use device::DeviceInterface;
pub use error::{LinkError, LinkResult};
pub use port::{PortProvider, SerialLink, SystemPorts};
pub use queue::{CommandQueue, QueuedCommand};
pub use sim::{SimulatedController, SIM_PORT};
pub use worker::{Disposition, WorkerStats};

pub use hydro_protocol::{Command, SensorReading};
