//! Link configuration.
//!
//! Timing values are stored in milliseconds so the YAML file stays readable:
//!
//! ```yaml
//! port: /dev/ttyACM0
//! baud_rate: 115200
//! settle_delay_ms: 2000
//! max_attempts: 5
//! ```
//!
//! Every field is optional in the file; missing fields take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};

/// Default controller baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default serial port of the controller.
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// Configuration for the controller link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Port opened when `connect` is called without one.
    pub port: String,

    /// Serial baud rate.
    pub baud_rate: u32,

    /// Read timeout of the serial handle (milliseconds).
    pub read_timeout_ms: u64,

    /// Wait after opening the port before traffic is sent (milliseconds).
    /// Opening the port resets the controller; it ignores input while booting.
    pub settle_delay_ms: u64,

    /// How long the worker blocks on an empty queue before re-checking
    /// the stop flag (milliseconds).
    pub poll_interval_ms: u64,

    /// Pause after each write so the controller can act (milliseconds).
    pub post_write_gap_ms: u64,

    /// How long to wait for a sensor report after `GET_SENSORS` (milliseconds).
    pub response_deadline_ms: u64,

    /// Sleep after deferring a command because the link is down (milliseconds).
    pub disconnected_backoff_ms: u64,

    /// Sleep after a write/read fault (milliseconds).
    pub fault_backoff_ms: u64,

    /// Link faults a command may suffer before it is dead-lettered.
    pub max_attempts: u32,

    /// Age past which a command the worker finds undeliverable because the
    /// link is down is dead-lettered (milliseconds). `None` keeps it forever.
    pub max_queue_age_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 1000,
            settle_delay_ms: 2000,
            poll_interval_ms: 100,
            post_write_gap_ms: 50,
            response_deadline_ms: 2000,
            disconnected_backoff_ms: 500,
            fault_backoff_ms: 1000,
            max_attempts: 5,
            max_queue_age_ms: Some(120_000),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl LinkConfig {
    /// Create a config for the given default port.
    pub fn new(port: impl Into<String>) -> Self {
        LinkConfig {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML configuration document.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Load a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> LinkResult<Self> {
        let path = path.as_ref();
        let config_error = |reason: String| LinkError::Config {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        Self::from_yaml_str(&text).map_err(|e| config_error(e.to_string()))
    }

    /// Set the default port.
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the serial read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = millis(timeout);
        self
    }

    /// Set the post-open settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = millis(delay);
        self
    }

    /// Set the empty-queue poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    /// Set the pause after each write.
    pub fn with_post_write_gap(mut self, gap: Duration) -> Self {
        self.post_write_gap_ms = millis(gap);
        self
    }

    /// Set the sensor response deadline.
    pub fn with_response_deadline(mut self, deadline: Duration) -> Self {
        self.response_deadline_ms = millis(deadline);
        self
    }

    /// Set the disconnected and fault backoffs.
    pub fn with_backoff(mut self, disconnected: Duration, fault: Duration) -> Self {
        self.disconnected_backoff_ms = millis(disconnected);
        self.fault_backoff_ms = millis(fault);
        self
    }

    /// Set the retry budget of each command.
    pub fn with_retry_limits(mut self, max_attempts: u32, max_queue_age: Option<Duration>) -> Self {
        self.max_attempts = max_attempts;
        self.max_queue_age_ms = max_queue_age.map(millis);
        self
    }

    /// Serial read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Post-open settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Empty-queue poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pause after each write.
    pub fn post_write_gap(&self) -> Duration {
        Duration::from_millis(self.post_write_gap_ms)
    }

    /// Sensor response deadline.
    pub fn response_deadline(&self) -> Duration {
        Duration::from_millis(self.response_deadline_ms)
    }

    /// Backoff after deferring a command while disconnected.
    pub fn disconnected_backoff(&self) -> Duration {
        Duration::from_millis(self.disconnected_backoff_ms)
    }

    /// Backoff after a link fault.
    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    /// Age limit of commands deferred while the link is down.
    pub fn max_queue_age(&self) -> Option<Duration> {
        self.max_queue_age_ms.map(Duration::from_millis)
    }
}
