//! Commands that can be sent to the controller.
//!
//! The controller understands two kinds of commands:
//! - The sensor query sentinel `GET_SENSORS`
//! - Control commands built from a device, an action and a channel

use crate::error::{ProtocolError, ProtocolResult};

/// Wire text of the sensor query sentinel.
pub const QUERY_SENSORS: &str = "GET_SENSORS";

/// The kind of a command, used by the worker to decide whether a response is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Sensor query; the controller answers with one report line.
    QuerySensors,
    /// Actuator control; no response is expected.
    Control,
}

impl CommandKind {
    /// Returns the kind as a lowercase string (used as a metric label).
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandKind::QuerySensors => "query_sensors",
            CommandKind::Control => "control",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands that can be sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the controller for a sensor report.
    QuerySensors,

    /// Drive an actuator, e.g. `lamp` + `on` + `1`.
    Control {
        /// Device identifier (`lamp`).
        device_id: String,
        /// Action (`on`, `off`).
        action: String,
        /// Channel identifier (`1`).
        channel: String,
    },

    /// Send a raw command string.
    Raw {
        /// The raw command text.
        command: String,
    },
}

impl Command {
    /// Build a control command, rejecting parts that would corrupt the line framing.
    pub fn control(
        device_id: impl Into<String>,
        action: impl Into<String>,
        channel: impl Into<String>,
    ) -> ProtocolResult<Command> {
        let device_id = device_id.into();
        let action = action.into();
        let channel = channel.into();

        for (name, part) in [("device", &device_id), ("action", &action), ("channel", &channel)] {
            if part.is_empty() {
                return Err(ProtocolError::InvalidCommand(format!("empty {name}")));
            }
            if part.contains(['\r', '\n']) {
                return Err(ProtocolError::InvalidCommand(format!(
                    "{name} contains a line terminator: {part:?}"
                )));
            }
        }

        Ok(Command::Control { device_id, action, channel })
    }

    /// Build a raw command from operator-typed text.
    pub fn raw(command: impl Into<String>) -> ProtocolResult<Command> {
        let command = command.into();
        let trimmed = command.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            return Err(ProtocolError::InvalidCommand("empty command".to_string()));
        }
        if trimmed.contains(['\r', '\n']) {
            return Err(ProtocolError::InvalidCommand(format!(
                "embedded line terminator: {command:?}"
            )));
        }
        Ok(Command::Raw { command: trimmed.to_string() })
    }

    /// The kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::QuerySensors => CommandKind::QuerySensors,
            Command::Control { .. } => CommandKind::Control,
            Command::Raw { command } => {
                if command.trim().eq_ignore_ascii_case(QUERY_SENSORS) {
                    CommandKind::QuerySensors
                } else {
                    CommandKind::Control
                }
            }
        }
    }

    /// Whether the worker should wait for a sensor report after sending this command.
    pub fn expects_reading(&self) -> bool {
        self.kind() == CommandKind::QuerySensors
    }

    /// Get the command string without the terminator.
    pub fn to_command_string(&self) -> String {
        match self {
            Command::QuerySensors => QUERY_SENSORS.to_string(),
            Command::Control { device_id, action, channel } => {
                format!("{device_id}{action}{channel}")
            }
            Command::Raw { command } => command.clone(),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_command_string())
    }
}
