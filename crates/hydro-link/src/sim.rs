//! In-process simulation of the greenhouse controller.
//!
//! [`SimulatedController`] behaves like the Arduino sketch on the other end of
//! the USB cable: it answers `GET_SENSORS` with a report line, switches lamps
//! on `lamp<on|off><channel>`, and prints a status line for each lamp change.
//! Tests and `hydroctl --simulate` use it in place of real hardware; it can
//! also inject write/read faults, refuse to open, go silent, or emit noise.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use hydro_protocol::{LineCodec, SensorReading, QUERY_SENSORS};
use parking_lot::Mutex;

use crate::error::{LinkError, LinkResult};
use crate::port::{PortProvider, SerialLink};

/// Port name the simulated controller enumerates as by default.
pub const SIM_PORT: &str = "/dev/ttySIM0";

#[derive(Debug)]
struct SimState {
    ports: Vec<String>,
    reading: SensorReading,
    responsive: bool,
    noise: Vec<String>,
    received: Vec<String>,
    lamps: BTreeMap<String, bool>,
    output: VecDeque<u8>,
    fail_writes: u32,
    fail_reads: u32,
    refuse_open: bool,
    opens: u32,
}

impl SimState {
    fn emit(&mut self, line: &str) {
        self.output.extend(line.as_bytes());
        self.output.extend(b"\r\n");
    }

    fn handle_line(&mut self, line: &str) {
        self.received.push(line.to_string());

        if line.trim().eq_ignore_ascii_case(QUERY_SENSORS) {
            if self.responsive {
                for noise in self.noise.clone() {
                    self.emit(&noise);
                }
                let report = self.reading.to_report_line();
                self.emit(&report);
            }
            return;
        }

        if let Some(rest) = line.strip_prefix("lamp") {
            let (on, channel) = if let Some(channel) = rest.strip_prefix("on") {
                (true, channel)
            } else if let Some(channel) = rest.strip_prefix("off") {
                (false, channel)
            } else {
                return;
            };
            self.lamps.insert(channel.to_string(), on);
            self.emit(&format!("Lamp {} {}", channel, if on { "ON" } else { "OFF" }));
        }
    }
}

/// A simulated controller shared between the test (or CLI) and the link.
///
/// Cloning yields another handle to the same controller.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// A responsive controller enumerated as [`SIM_PORT`].
    pub fn new() -> Self {
        SimulatedController {
            state: Arc::new(Mutex::new(SimState {
                ports: vec![SIM_PORT.to_string()],
                reading: SensorReading {
                    temperature: 25.3,
                    humidity: 60.1,
                    tds: 450.0,
                    ph: 6.8,
                    ec: None,
                },
                responsive: true,
                noise: Vec::new(),
                received: Vec::new(),
                lamps: BTreeMap::new(),
                output: VecDeque::new(),
                fail_writes: 0,
                fail_reads: 0,
                refuse_open: false,
                opens: 0,
            })),
        }
    }

    /// Replace the enumerated port list.
    pub fn with_ports<I, S>(self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().ports = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Set the values reported on the next `GET_SENSORS`.
    pub fn set_reading(&self, reading: SensorReading) {
        self.state.lock().reading = reading;
    }

    /// Stop (or resume) answering `GET_SENSORS`.
    pub fn set_responsive(&self, responsive: bool) {
        self.state.lock().responsive = responsive;
    }

    /// Lines printed before each sensor report.
    pub fn set_noise<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().noise = lines.into_iter().map(Into::into).collect();
    }

    /// Fail the next `count` writes with a broken pipe.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().fail_writes = count;
    }

    /// Fail the next `count` reads with a broken pipe.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().fail_reads = count;
    }

    /// Make `open` fail even though the port is enumerated.
    pub fn set_refuse_open(&self, refuse: bool) {
        self.state.lock().refuse_open = refuse;
    }

    /// Every line the controller has received, in order.
    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    /// How many times `line` has been received.
    pub fn received_count(&self, line: &str) -> usize {
        self.state.lock().received.iter().filter(|l| l.as_str() == line).count()
    }

    /// Current lamp state of `channel`, if it was ever switched.
    pub fn lamp(&self, channel: &str) -> Option<bool> {
        self.state.lock().lamps.get(channel).copied()
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> u32 {
        self.state.lock().opens
    }
}

impl PortProvider for SimulatedController {
    fn available_ports(&self) -> LinkResult<Vec<String>> {
        Ok(self.state.lock().ports.clone())
    }

    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> LinkResult<Box<dyn SerialLink>> {
        let mut state = self.state.lock();
        if state.refuse_open {
            return Err(LinkError::Open {
                port: port.to_string(),
                reason: "device busy".to_string(),
            });
        }
        state.opens += 1;
        // Opening resets the board; anything it printed before is gone.
        state.output.clear();
        Ok(Box::new(SimLink {
            state: Arc::clone(&self.state),
            inbound: LineCodec::new(),
        }))
    }
}

struct SimLink {
    state: Arc<Mutex<SimState>>,
    inbound: LineCodec,
}

impl SerialLink for SimLink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write fault"));
        }
        self.inbound.push(data);
        while let Some(line) = self.inbound.decode_line() {
            state.handle_line(&line);
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated read fault"));
        }
        let n = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(sim: &SimulatedController) -> Box<dyn SerialLink> {
        sim.open(SIM_PORT, 115200, Duration::from_millis(10)).unwrap()
    }

    fn read_all(link: &mut Box<dyn SerialLink>) -> String {
        let mut buf = [0u8; 512];
        let n = link.read_available(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[test]
    fn test_answers_sensor_query() {
        let sim = SimulatedController::new();
        let mut link = open(&sim);

        link.write_all(b"GET_SENSORS\n").unwrap();
        assert_eq!(read_all(&mut link), "Temp:25.3°C, Humidity:60.1%, TDS:450ppm, PH:6.8\r\n");
        assert_eq!(sim.received(), vec!["GET_SENSORS".to_string()]);
    }

    #[test]
    fn test_switches_lamps() {
        let sim = SimulatedController::new();
        let mut link = open(&sim);

        link.write_all(b"lampon1\nlampoff2\n").unwrap();
        assert_eq!(sim.lamp("1"), Some(true));
        assert_eq!(sim.lamp("2"), Some(false));
        assert_eq!(sim.lamp("3"), None);
        assert_eq!(read_all(&mut link), "Lamp 1 ON\r\nLamp 2 OFF\r\n");
    }

    #[test]
    fn test_silent_controller() {
        let sim = SimulatedController::new();
        sim.set_responsive(false);
        let mut link = open(&sim);

        link.write_all(b"GET_SENSORS\n").unwrap();
        assert_eq!(read_all(&mut link), "");
    }

    #[test]
    fn test_injected_faults() {
        let sim = SimulatedController::new();
        let mut link = open(&sim);

        sim.fail_next_writes(1);
        assert!(link.write_all(b"lampon1\n").is_err());
        assert!(link.write_all(b"lampon1\n").is_ok());
        assert_eq!(sim.received_count("lampon1"), 1);

        sim.fail_next_reads(1);
        let mut buf = [0u8; 8];
        assert!(link.read_available(&mut buf).is_err());
    }

    #[test]
    fn test_refuse_open() {
        let sim = SimulatedController::new();
        sim.set_refuse_open(true);
        assert!(sim.open(SIM_PORT, 115200, Duration::from_millis(10)).is_err());
        assert_eq!(sim.open_count(), 0);
    }
}
