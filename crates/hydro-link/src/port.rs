//! Serial port abstraction.
//!
//! The connection manager never talks to `serialport` directly; it goes
//! through [`PortProvider`] (enumerate and open) and [`SerialLink`] (byte
//! I/O on an open handle). [`SystemPorts`] is the hardware implementation,
//! [`crate::sim::SimulatedController`] the in-process one.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::{LinkError, LinkResult};

/// An open serial handle.
pub trait SerialLink: Send {
    /// Write the whole buffer and flush it to the device.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read bytes that have already arrived, without waiting.
    ///
    /// Returns `Ok(0)` when nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Source of serial ports.
pub trait PortProvider: Send + Sync {
    /// Names of the ports currently present on the host.
    fn available_ports(&self) -> LinkResult<Vec<String>>;

    /// Open a port with the controller's framing (8N1, no flow control).
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> LinkResult<Box<dyn SerialLink>>;
}

/// Ports of the host, through the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn available_ports(&self) -> LinkResult<Vec<String>> {
        let ports = serialport::available_ports()
            .map_err(|e| LinkError::Enumeration(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> LinkResult<Box<dyn SerialLink>> {
        let handle = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| LinkError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(SerialPortLink { port: handle }))
    }
}

/// [`SerialLink`] over a `serialport` handle.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink for SerialPortLink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, data)?;
        self.port.flush()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = pending.min(buf.len());
        match self.port.read(&mut buf[..len]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}
