//! Ownership of the physical serial link.
//!
//! [`ConnectionManager`] holds at most one open handle. The handle sits behind
//! a single mutex that the worker and the synchronous lamp path share, so link
//! I/O is effectively single-threaded however many callers use the facade.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::port::{PortProvider, SerialLink};
use crate::telemetry;

/// Whether the link is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No handle is held.
    Disconnected,
    /// A handle is held and traffic may flow.
    Connected,
}

/// Snapshot of the link, recomputed on each call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Last-known port.
    pub port: String,
    /// Configured baud rate.
    pub baud_rate: u32,
    /// Serial read timeout.
    pub timeout: Duration,
    /// Whether the link is open.
    pub connected: bool,
}

/// Result of a successful [`ConnectionManager::try_open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new handle was opened.
    Opened,
    /// A handle was already held; nothing was done.
    AlreadyConnected,
}

/// Owns the serial handle and its state.
pub struct ConnectionManager {
    config: LinkConfig,
    provider: Arc<dyn PortProvider>,
    link: Mutex<Option<Box<dyn SerialLink>>>,
    state: RwLock<ConnectionState>,
    port: RwLock<String>,
}

impl ConnectionManager {
    /// Create a manager; nothing is opened until [`open`](Self::open).
    pub fn new(config: LinkConfig, provider: Arc<dyn PortProvider>) -> Self {
        let port = config.port.clone();
        ConnectionManager {
            config,
            provider,
            link: Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            port: RwLock::new(port),
        }
    }

    /// Open the link, returning whether it is open afterwards.
    ///
    /// Without `port`, the last-known port is used. Failures are logged,
    /// never raised.
    pub fn open(&self, port: Option<&str>) -> bool {
        let requested = port.map(str::to_string).unwrap_or_else(|| self.port());
        match self.try_open(&requested) {
            Ok(OpenOutcome::Opened) => {
                telemetry::connect_attempt(&requested, "connected");
                true
            }
            Ok(OpenOutcome::AlreadyConnected) => {
                telemetry::connect_attempt(&requested, "already_connected");
                true
            }
            Err(e) => {
                let outcome = match e {
                    LinkError::PortNotFound { .. } => "port_not_found",
                    _ => "failed",
                };
                telemetry::connect_attempt(&requested, outcome);
                warn!("Connect to {requested} failed: {e}");
                false
            }
        }
    }

    /// Open `port`, reporting why it failed.
    ///
    /// The port must be enumerated by the provider. On success the manager
    /// waits the settle delay before declaring the link connected, and `port`
    /// becomes the last-known port.
    pub fn try_open(&self, port: &str) -> LinkResult<OpenOutcome> {
        let available = self.provider.available_ports()?;
        if !available.iter().any(|p| p == port) {
            return Err(LinkError::PortNotFound {
                port: port.to_string(),
                available,
            });
        }

        let mut link = self.link.lock();
        if link.is_some() {
            return Ok(OpenOutcome::AlreadyConnected);
        }

        let handle = self.provider.open(port, self.config.baud_rate, self.config.read_timeout())?;

        // Opening the port resets the controller.
        thread::sleep(self.config.settle_delay());

        *link = Some(handle);
        *self.port.write() = port.to_string();
        *self.state.write() = ConnectionState::Connected;
        telemetry::connected(port, true);
        info!("Connected to serial {port} at {} baud", self.config.baud_rate);
        Ok(OpenOutcome::Opened)
    }

    /// Release the handle. Safe to call when already closed.
    pub fn close(&self) {
        let mut link = self.link.lock();
        if link.take().is_some() {
            *self.state.write() = ConnectionState::Disconnected;
            let port = self.port();
            telemetry::connected(&port, false);
            info!("Serial {port} disconnected");
        }
    }

    /// Run `f` against the open handle while holding the link mutex.
    ///
    /// Returns [`LinkError::NotConnected`] without calling `f` when no handle
    /// is held. Errors from `f` are returned as-is; the caller decides
    /// whether a fault tears the link down.
    pub fn with_link<T>(
        &self,
        f: impl FnOnce(&mut dyn SerialLink) -> LinkResult<T>,
    ) -> LinkResult<T> {
        let mut link = self.link.lock();
        match link.as_mut() {
            Some(handle) => f(handle.as_mut()),
            None => Err(LinkError::NotConnected),
        }
    }

    /// Whether a handle is held.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Last-known port.
    pub fn port(&self) -> String {
        self.port.read().clone()
    }

    /// Snapshot of the link; performs no I/O.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            port: self.port(),
            baud_rate: self.config.baud_rate,
            timeout: self.config.read_timeout(),
            connected: self.is_connected(),
        }
    }

    /// Ports currently enumerated by the provider.
    pub fn available_ports(&self) -> LinkResult<Vec<String>> {
        self.provider.available_ports()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedController, SIM_PORT};

    fn manager(sim: &SimulatedController) -> ConnectionManager {
        let config = LinkConfig::new(SIM_PORT).with_settle_delay(Duration::ZERO);
        ConnectionManager::new(config, Arc::new(sim.clone()))
    }

    #[test]
    fn test_open_default_port() {
        let sim = SimulatedController::new();
        let manager = manager(&sim);

        assert!(!manager.is_connected());
        assert!(manager.open(None));
        assert!(manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(sim.open_count(), 1);
    }

    #[test]
    fn test_open_unknown_port() {
        let sim = SimulatedController::new();
        let manager = manager(&sim);

        assert!(!manager.open(Some("/dev/ttyUSB9")));
        assert!(!manager.is_connected());
        assert!(matches!(
            manager.try_open("/dev/ttyUSB9"),
            Err(LinkError::PortNotFound { .. })
        ));
        assert_eq!(sim.open_count(), 0);
    }

    #[test]
    fn test_open_failure() {
        let sim = SimulatedController::new();
        sim.set_refuse_open(true);
        let manager = manager(&sim);

        assert!(!manager.open(None));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_open_twice_is_noop() {
        let sim = SimulatedController::new();
        let manager = manager(&sim);

        assert!(manager.open(None));
        assert_eq!(manager.try_open(SIM_PORT).unwrap(), OpenOutcome::AlreadyConnected);
        assert_eq!(sim.open_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let sim = SimulatedController::new();
        let manager = manager(&sim);

        manager.close();
        assert!(manager.open(None));
        manager.close();
        manager.close();
        assert!(!manager.is_connected());
        assert!(matches!(
            manager.with_link(|_| Ok(())),
            Err(LinkError::NotConnected)
        ));
    }

    #[test]
    fn test_opened_port_becomes_last_known() {
        let sim = SimulatedController::new().with_ports([SIM_PORT, "/dev/ttySIM1"]);
        let manager = manager(&sim);

        assert!(manager.open(Some("/dev/ttySIM1")));
        manager.close();

        let info = manager.info();
        assert_eq!(info.port, "/dev/ttySIM1");
        assert!(!info.connected);
        assert_eq!(info.baud_rate, 115200);
        assert_eq!(info.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_with_link_writes() {
        let sim = SimulatedController::new();
        let manager = manager(&sim);
        assert!(manager.open(None));

        manager
            .with_link(|link| Ok(link.write_all(b"lampon3\n")?))
            .unwrap();
        assert_eq!(sim.lamp("3"), Some(true));
    }
}
