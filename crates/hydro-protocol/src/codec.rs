//! Line-based codec for controller communication.
//!
//! Commands are terminated with a newline (`\n`). The controller prints its
//! reports terminated with `\r\n`; anything that is not a sensor report is
//! treated as noise by [`LineCodec::decode`].

use bytes::BytesMut;
use log::trace;

use crate::commands::Command;
use crate::error::{ProtocolError, ProtocolResult};
use crate::responses::SensorReading;

/// Maximum accepted line length. Longer lines are dropped as noise.
pub const MAX_LINE_LENGTH: usize = 160;

/// Terminator appended to outbound commands.
pub const LINE_TERMINATOR: u8 = b'\n';

/// A codec for reading and writing controller lines.
///
/// This handles the line-based nature of the serial protocol:
/// - Accumulates received bytes until a complete line is found
/// - Strips `\r`/`\n` terminators and skips empty lines
/// - Discards runaway lines that exceed [`MAX_LINE_LENGTH`]
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Set while discarding the rest of an overlong line.
    discarding: bool,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH * 2),
            discarding: false,
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode any complete line from the buffer.
    ///
    /// Returns `None` if more data is needed.
    pub fn decode_line(&mut self) -> Option<String> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n') else {
                if self.buffer.len() > MAX_LINE_LENGTH {
                    trace!("Dropping {} bytes of an overlong line", self.buffer.len());
                    self.buffer.clear();
                    self.discarding = true;
                }
                return None;
            };

            let line_data = self.buffer.split_to(end);

            // Skip the newline character(s)
            while !self.buffer.is_empty() && (self.buffer[0] == b'\r' || self.buffer[0] == b'\n') {
                let _ = self.buffer.split_to(1);
            }

            if self.discarding {
                self.discarding = false;
                continue;
            }

            if let Err(e) = Self::check_length(line_data.len()) {
                trace!("Dropping line: {e}");
                continue;
            }

            let line = String::from_utf8_lossy(&line_data).to_string();

            // Skip empty lines
            if line.trim().is_empty() {
                continue;
            }

            return Some(line);
        }
    }

    fn check_length(len: usize) -> ProtocolResult<()> {
        if len > MAX_LINE_LENGTH {
            return Err(ProtocolError::BufferOverflow { max: MAX_LINE_LENGTH, actual: len });
        }
        Ok(())
    }

    /// Encode a command for transmission.
    ///
    /// Appends the newline terminator unless the text already ends with one.
    pub fn encode(cmd: &Command) -> Vec<u8> {
        Self::encode_command(&cmd.to_command_string())
    }

    /// Encode raw command text for transmission.
    pub fn encode_command(cmd: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(cmd.len() + 1);
        buf.extend_from_slice(cmd.as_bytes());
        if buf.last() != Some(&LINE_TERMINATOR) {
            buf.push(LINE_TERMINATOR);
        }
        buf
    }

    /// Decode a line into a sensor reading.
    ///
    /// Lines that are not valid sensor reports are noise and yield `None`.
    pub fn decode(line: &str) -> Option<SensorReading> {
        match SensorReading::parse(line) {
            Ok(reading) => Some(reading),
            Err(e) => {
                trace!("Ignoring controller line: {e}");
                None
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
