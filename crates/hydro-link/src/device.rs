//! The device facade used by the rest of the application.

use std::sync::Arc;

use hydro_protocol::{Command, LineCodec, SensorReading};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::LatestReadingCache;
use crate::config::LinkConfig;
use crate::connection::{ConnectionInfo, ConnectionManager};
use crate::error::LinkResult;
use crate::port::{PortProvider, SerialLink, SystemPorts};
use crate::queue::CommandQueue;
use crate::telemetry;
use crate::worker::{Worker, WorkerContext, WorkerCounters, WorkerStats};

/// One controller on one serial link.
///
/// Construct one per physical device and share it behind an `Arc`. No method
/// returns an error: connection problems become `false`, link faults are
/// absorbed by the background worker.
pub struct DeviceInterface {
    config: LinkConfig,
    connection: Arc<ConnectionManager>,
    queue: CommandQueue,
    cache: Arc<LatestReadingCache>,
    counters: Arc<WorkerCounters>,
    worker: Mutex<Option<Worker>>,
}

impl DeviceInterface {
    /// A device on the host's serial ports.
    pub fn new(config: LinkConfig) -> Self {
        Self::with_provider(config, Arc::new(SystemPorts))
    }

    /// A device on ports from `provider`.
    pub fn with_provider(config: LinkConfig, provider: Arc<dyn PortProvider>) -> Self {
        let connection = Arc::new(ConnectionManager::new(config.clone(), provider));
        DeviceInterface {
            config,
            connection,
            queue: CommandQueue::new(),
            cache: Arc::new(LatestReadingCache::new()),
            counters: Arc::new(WorkerCounters::default()),
            worker: Mutex::new(None),
        }
    }

    /// The configuration this device was built with.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open the link (default: last-known port) and make sure the worker runs.
    pub fn connect(&self, port: Option<&str>) -> bool {
        if !self.connection.open(port) {
            return false;
        }
        self.ensure_worker();
        true
    }

    /// Close the link and stop the worker, waiting for it to exit.
    ///
    /// Queued commands stay queued, untouched, until a later `connect`
    /// restarts the worker.
    pub fn disconnect(&self) {
        self.connection.close();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop();
            info!("Hardware worker shut down");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.connection.info()
    }

    /// Open the last-known port if the link is down.
    ///
    /// Does nothing when already connected.
    pub fn try_reconnect(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        debug!("Reconnecting to {}", self.connection.port());
        self.connect(None)
    }

    /// Queue a sensor query and return the reading cached so far.
    ///
    /// The returned value is from an earlier query; the one queued here lands
    /// in the cache once the worker gets to it.
    pub fn request_sensor_reading(&self) -> Option<SensorReading> {
        self.send_command(Command::QuerySensors);
        self.cache.latest()
    }

    /// The cached reading, without queueing a query.
    pub fn latest_reading(&self) -> Option<SensorReading> {
        self.cache.latest()
    }

    /// Queue a lamp command and, if connected, also write it right away.
    ///
    /// Returns true only if the immediate write succeeded. The queued copy is
    /// delivered by the worker either way.
    pub fn control_lamp(&self, device_id: &str, action: &str, channel: &str) -> bool {
        let command = match Command::control(device_id, action, channel) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected lamp command: {}", e);
                return false;
            }
        };
        self.send_command(command.clone());

        if !self.is_connected() {
            info!("control_lamp called but serial not connected; queued {}", command);
            return false;
        }

        let bytes = LineCodec::encode(&command);
        match self.connection.with_link(|link| Ok(link.write_all(&bytes)?)) {
            Ok(()) => {
                telemetry::written(&self.connection.port(), command.kind(), "immediate");
                debug!("Immediate send -> {}", command);
                true
            }
            Err(e) => {
                warn!("Immediate send of {} failed, left in queue: {}", command, e);
                false
            }
        }
    }

    /// Queue any command for the worker; returns the queue depth.
    ///
    /// A sensor query is merged into one that is already waiting.
    pub fn send_command(&self, command: Command) -> usize {
        let kind = command.kind();
        match self.queue.push(command) {
            Some(depth) => {
                telemetry::enqueued(&self.connection.port(), kind, depth);
                depth
            }
            None => {
                debug!("Sensor query already pending; merged");
                self.queue.len()
            }
        }
    }

    /// Commands waiting for the worker.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Totals since this device was created.
    pub fn worker_stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Whether a worker thread is running.
    pub fn worker_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_running)
    }

    /// Ports currently present.
    pub fn available_ports(&self) -> LinkResult<Vec<String>> {
        self.connection.available_ports()
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(Worker::is_running) {
            return;
        }

        let ctx = WorkerContext {
            config: self.config.clone(),
            connection: Arc::clone(&self.connection),
            queue: self.queue.clone(),
            cache: Arc::clone(&self.cache),
            counters: Arc::clone(&self.counters),
        };
        match Worker::spawn(ctx) {
            Ok(spawned) => *worker = Some(spawned),
            Err(e) => error!("Failed to start hardware worker: {}", e),
        }
    }
}

impl Drop for DeviceInterface {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedController, SIM_PORT};
    use std::time::Duration;

    fn device(sim: &SimulatedController) -> DeviceInterface {
        let config = LinkConfig::new(SIM_PORT)
            .with_settle_delay(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(5))
            .with_backoff(Duration::from_millis(5), Duration::from_millis(5));
        DeviceInterface::with_provider(config, Arc::new(sim.clone()))
    }

    #[test]
    fn test_invalid_lamp_command_is_not_queued() {
        let sim = SimulatedController::new();
        let device = device(&sim);

        assert!(!device.control_lamp("lamp", "", "1"));
        assert!(!device.control_lamp("lamp", "on\n", "1"));
        assert_eq!(device.pending_commands(), 0);
    }

    #[test]
    fn test_worker_starts_on_connect() {
        let sim = SimulatedController::new();
        let device = device(&sim);

        assert!(!device.worker_running());
        assert!(device.connect(None));
        assert!(device.worker_running());

        device.disconnect();
        assert!(!device.worker_running());
        assert!(!device.is_connected());
    }

    #[test]
    fn test_failed_connect_starts_no_worker() {
        let sim = SimulatedController::new();
        let device = device(&sim);

        assert!(!device.connect(Some("/dev/ttyNOPE")));
        assert!(!device.worker_running());
    }

    #[test]
    fn test_request_reading_without_cache() {
        let sim = SimulatedController::new();
        let device = device(&sim);

        assert_eq!(device.request_sensor_reading(), None);
        assert_eq!(device.pending_commands(), 1);
    }

    #[test]
    fn test_repeated_requests_queue_one_query() {
        let sim = SimulatedController::new();
        let device = device(&sim);

        for _ in 0..50 {
            device.request_sensor_reading();
        }
        assert!(!device.control_lamp("lamp", "on", "1"));
        assert_eq!(device.pending_commands(), 2);
    }
}
