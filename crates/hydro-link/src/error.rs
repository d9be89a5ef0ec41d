//! Error types for the serial link.
//!
//! None of these escape the [`DeviceInterface`](crate::DeviceInterface)
//! facade: connection errors become `false`, link faults are absorbed by the
//! worker.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while managing the serial link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The requested port is not among the enumerated system ports.
    #[error("port {port} not found (available: {available:?})")]
    PortNotFound {
        /// The port that was requested.
        port: String,
        /// Ports enumerated at the time of the request.
        available: Vec<String>,
    },

    /// Serial port enumeration failed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumeration(String),

    /// The port exists but could not be opened.
    #[error("failed to open {port}: {reason}")]
    Open {
        /// The port that failed to open.
        port: String,
        /// Driver-level reason.
        reason: String,
    },

    /// Write or read failure on an open link.
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),

    /// The link is not open.
    #[error("serial link is not connected")]
    NotConnected,

    /// Configuration file could not be loaded.
    #[error("invalid configuration {path}: {reason}")]
    Config {
        /// Path of the configuration file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
