//! Error types for the controller protocol.

use thiserror::Error;

/// Errors that can occur when working with the controller protocol.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The line is not a sensor report.
    #[error("not a sensor report line: {0:?}")]
    NotSensorLine(String),

    /// A required field is absent from a sensor report.
    #[error("sensor report is missing field `{0}`")]
    MissingField(&'static str),

    /// A field value could not be parsed as a number.
    #[error("invalid value for `{field}`: {value:?}")]
    InvalidValue {
        /// Wire name of the field.
        field: &'static str,
        /// The raw text that failed to parse.
        value: String,
    },

    /// Invalid command format.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Buffer overflow (line too long).
    #[error("buffer overflow: max {max} bytes, got {actual}")]
    BufferOverflow { max: usize, actual: usize },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
