//! Background worker that owns all queued link traffic.
//!
//! The worker pops one command at a time, writes it while holding the link
//! mutex and, for `GET_SENSORS`, polls for the report line until the response
//! deadline. Link faults close the link and put the command back; the
//! command's retry budget decides when it is dropped instead. While the link
//! is down, commands older than the queue age limit are dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hydro_protocol::{LineCodec, SensorReading};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::cache::LatestReadingCache;
use crate::config::LinkConfig;
use crate::connection::ConnectionManager;
use crate::error::{LinkError, LinkResult};
use crate::port::SerialLink;
use crate::queue::{CommandQueue, QueuedCommand};
use crate::telemetry;

/// Step between polls of the port while waiting for a sensor report.
const READ_POLL_STEP: Duration = Duration::from_millis(50);

/// Bytes read from the port per poll.
const READ_CHUNK: usize = 256;

/// Snapshot of worker activity since the device was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Commands written by the worker.
    pub commands_written: u64,
    /// Sensor readings parsed and published to the cache.
    pub readings_published: u64,
    /// Sensor queries that got no valid report before the deadline.
    pub query_timeouts: u64,
    /// Write or read faults.
    pub link_faults: u64,
    /// Commands put back on the queue, for any reason.
    pub requeued: u64,
    /// Commands dropped after exhausting their retry budget.
    pub dead_lettered: u64,
}

/// Live counters behind [`WorkerStats`].
///
/// Shared by every worker a device starts, so the totals survive restarts.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    commands_written: AtomicU64,
    readings_published: AtomicU64,
    query_timeouts: AtomicU64,
    link_faults: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
}

impl WorkerCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals.
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            commands_written: self.commands_written.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
            query_timeouts: self.query_timeouts.load(Ordering::Relaxed),
            link_faults: self.link_faults.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Everything the worker shares with the device facade.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: LinkConfig,
    pub connection: Arc<ConnectionManager>,
    pub queue: CommandQueue,
    pub cache: Arc<LatestReadingCache>,
    pub counters: Arc<WorkerCounters>,
}

/// What happened to one popped command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Written; nothing was expected back.
    Written,
    /// Written and a sensor reading was published.
    Published,
    /// Written but no valid report arrived before the deadline.
    TimedOut,
    /// Link was down; the command went back to the tail.
    Deferred,
    /// Link faulted; it was closed and the command went back to the tail.
    Faulted,
    /// Retry budget exhausted; the command was dropped.
    DeadLettered,
}

/// The loop body, separate from its thread so it can be stepped directly.
pub struct WorkerLoop {
    ctx: WorkerContext,
    stop_flag: Arc<AtomicBool>,
}

impl WorkerLoop {
    pub fn new(ctx: WorkerContext, stop_flag: Arc<AtomicBool>) -> Self {
        WorkerLoop { ctx, stop_flag }
    }

    fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Run until the stop flag is set.
    pub fn run(&self) {
        info!("Hardware worker started");
        while !self.should_stop() {
            self.step();
        }
        info!("Hardware worker stopped ({} commands pending)", self.ctx.queue.len());
    }

    /// Pop one command (waiting up to the poll interval) and handle it.
    ///
    /// Returns `None` when the queue stayed empty.
    pub fn step(&self) -> Option<Disposition> {
        let queued = self.ctx.queue.pop_timeout(self.ctx.config.poll_interval())?;
        telemetry::queue_depth(&self.ctx.connection.port(), self.ctx.queue.len());
        Some(self.handle(queued))
    }

    fn handle(&self, queued: QueuedCommand) -> Disposition {
        if !self.ctx.connection.is_connected() {
            return self.defer(queued);
        }

        match self.ctx.connection.with_link(|link| self.service(link, &queued)) {
            Ok(Some(reading)) => {
                let latency = queued.age().as_secs_f64() * 1000.0;
                self.ctx.cache.publish(reading);
                WorkerCounters::bump(&self.ctx.counters.readings_published);
                telemetry::reading_published(&self.ctx.connection.port(), latency);
                debug!("Sensor reading published: {}", reading);
                Disposition::Published
            }
            Ok(None) if queued.command.expects_reading() => {
                WorkerCounters::bump(&self.ctx.counters.query_timeouts);
                telemetry::query_timeout(&self.ctx.connection.port());
                warn!(
                    "No sensor report within {:?}; keeping previous reading",
                    self.ctx.config.response_deadline()
                );
                Disposition::TimedOut
            }
            Ok(None) => Disposition::Written,
            // Closed between the check above and taking the mutex.
            Err(LinkError::NotConnected) => self.defer(queued),
            Err(e) => self.fault(queued, e),
        }
    }

    /// Write the command and, for a sensor query, wait for the report.
    ///
    /// Runs with the link mutex held.
    fn service(
        &self,
        link: &mut dyn SerialLink,
        queued: &QueuedCommand,
    ) -> LinkResult<Option<SensorReading>> {
        let port = self.ctx.connection.port();
        let command = &queued.command;

        link.write_all(&LineCodec::encode(command)).map_err(|e| {
            telemetry::link_fault(&port, "write");
            LinkError::Io(e)
        })?;
        WorkerCounters::bump(&self.ctx.counters.commands_written);
        telemetry::written(&port, command.kind(), "worker");
        debug!("Worker sent -> {}", command);

        thread::sleep(self.ctx.config.post_write_gap());

        if !command.expects_reading() {
            return Ok(None);
        }

        self.read_report(link).map_err(|e| {
            telemetry::link_fault(&port, "read");
            LinkError::Io(e)
        })
    }

    /// Poll for lines until one decodes or the response deadline passes.
    fn read_report(&self, link: &mut dyn SerialLink) -> std::io::Result<Option<SensorReading>> {
        let deadline = Instant::now() + self.ctx.config.response_deadline();
        let mut codec = LineCodec::new();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let n = link.read_available(&mut buf)?;
            if n > 0 {
                codec.push(&buf[..n]);
                while let Some(line) = codec.decode_line() {
                    if let Some(reading) = LineCodec::decode(&line) {
                        return Ok(Some(reading));
                    }
                    trace!("Discarding line: {:?}", line);
                    telemetry::noise_line(&self.ctx.connection.port());
                }
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(READ_POLL_STEP.min(deadline - now));
        }
    }

    fn defer(&self, mut queued: QueuedCommand) -> Disposition {
        queued.deferrals += 1;
        let port = self.ctx.connection.port();
        let kind = queued.command.kind();

        // Nothing gets written until the link returns; drop what has gone stale.
        self.sweep_expired();
        if self.is_expired(&queued) {
            return self.dead_letter(queued, "expired");
        }

        warn!(
            "Serial not connected; requeuing {} (deferral {}) and waiting",
            queued.command, queued.deferrals
        );
        self.requeue(queued);
        telemetry::requeued(&port, kind, "disconnected");
        self.pause(self.ctx.config.disconnected_backoff());
        Disposition::Deferred
    }

    fn is_expired(&self, queued: &QueuedCommand) -> bool {
        self.ctx
            .config
            .max_queue_age()
            .is_some_and(|max_age| queued.age() > max_age)
    }

    /// Dead-letter every waiting command older than the queue age limit.
    ///
    /// The rest go back in their current order.
    fn sweep_expired(&self) {
        if self.ctx.config.max_queue_age().is_none() {
            return;
        }
        for _ in 0..self.ctx.queue.len() {
            match self.ctx.queue.try_pop() {
                Some(queued) if self.is_expired(&queued) => {
                    self.dead_letter(queued, "expired");
                }
                Some(queued) => {
                    self.ctx.queue.requeue(queued);
                }
                None => break,
            }
        }
    }

    fn fault(&self, mut queued: QueuedCommand, e: LinkError) -> Disposition {
        queued.attempts += 1;
        WorkerCounters::bump(&self.ctx.counters.link_faults);
        let port = self.ctx.connection.port();
        let kind = queued.command.kind();

        error!("Serial error while sending {}: {}; closing link", queued.command, e);
        self.ctx.connection.close();

        let disposition = if queued.attempts >= self.ctx.config.max_attempts {
            self.dead_letter(queued, "attempts")
        } else {
            self.requeue(queued);
            telemetry::requeued(&port, kind, "fault");
            Disposition::Faulted
        };
        self.pause(self.ctx.config.fault_backoff());
        disposition
    }

    fn requeue(&self, queued: QueuedCommand) {
        let depth = self.ctx.queue.requeue(queued);
        WorkerCounters::bump(&self.ctx.counters.requeued);
        telemetry::queue_depth(&self.ctx.connection.port(), depth);
    }

    fn dead_letter(&self, queued: QueuedCommand, reason: &'static str) -> Disposition {
        WorkerCounters::bump(&self.ctx.counters.dead_lettered);
        telemetry::dead_lettered(&self.ctx.connection.port(), queued.command.kind(), reason);
        error!(
            "Dropping {} after {} faults and {} deferrals (queued {:?} ago)",
            queued.command,
            queued.attempts,
            queued.deferrals,
            queued.age()
        );
        Disposition::DeadLettered
    }

    /// Sleep for `duration`, waking early if the stop flag is set.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let step = self.ctx.config.poll_interval().max(Duration::from_millis(1));
        loop {
            let now = Instant::now();
            if now >= deadline || self.should_stop() {
                return;
            }
            thread::sleep(step.min(deadline - now));
        }
    }
}

/// Handle to a running worker thread.
pub struct Worker {
    stop_flag: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start a worker thread.
    pub fn spawn(ctx: WorkerContext) -> LinkResult<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let worker_loop = WorkerLoop::new(ctx, Arc::clone(&stop_flag));

        let thread_handle = thread::Builder::new()
            .name("hydro-worker".to_string())
            .spawn(move || worker_loop.run())?;

        Ok(Worker {
            stop_flag,
            thread_handle: Some(thread_handle),
        })
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the thread to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Stop the thread and wait for it to finish.
    pub fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Hardware worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedController, SIM_PORT};
    use hydro_protocol::Command;

    struct Harness {
        sim: SimulatedController,
        ctx: WorkerContext,
        worker_loop: WorkerLoop,
    }

    fn harness(config: LinkConfig) -> Harness {
        let sim = SimulatedController::new();
        let connection = Arc::new(ConnectionManager::new(config.clone(), Arc::new(sim.clone())));
        let ctx = WorkerContext {
            config,
            connection,
            queue: CommandQueue::new(),
            cache: Arc::new(LatestReadingCache::new()),
            counters: Arc::new(WorkerCounters::default()),
        };
        let worker_loop = WorkerLoop::new(ctx.clone(), Arc::new(AtomicBool::new(false)));
        Harness { sim, ctx, worker_loop }
    }

    fn fast_config() -> LinkConfig {
        LinkConfig::new(SIM_PORT)
            .with_settle_delay(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(5))
            .with_post_write_gap(Duration::ZERO)
            .with_response_deadline(Duration::from_millis(100))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(1))
    }

    fn lamp_on(channel: &str) -> Command {
        Command::control("lamp", "on", channel).unwrap()
    }

    #[test]
    fn test_step_on_empty_queue() {
        let h = harness(fast_config());
        assert_eq!(h.worker_loop.step(), None);
    }

    #[test]
    fn test_query_publishes_reading() {
        let h = harness(fast_config());
        assert!(h.ctx.connection.open(None));

        h.ctx.queue.push(Command::QuerySensors);
        assert_eq!(h.worker_loop.step(), Some(Disposition::Published));

        let reading = h.ctx.cache.latest().unwrap();
        assert_eq!(reading.temperature, 25.3);
        assert_eq!(reading.ph, 6.8);
        assert_eq!(h.ctx.counters.snapshot().readings_published, 1);
        assert_eq!(h.ctx.counters.snapshot().commands_written, 1);
    }

    #[test]
    fn test_query_skips_noise() {
        let h = harness(fast_config());
        h.sim.set_noise(["Lamp 1 ON", "booting...", "Temp:oops"]);
        assert!(h.ctx.connection.open(None));

        h.ctx.queue.push(Command::QuerySensors);
        assert_eq!(h.worker_loop.step(), Some(Disposition::Published));
        assert_eq!(h.ctx.cache.latest().unwrap().tds, 450.0);
    }

    #[test]
    fn test_query_timeout_keeps_cache() {
        let h = harness(fast_config());
        assert!(h.ctx.connection.open(None));
        h.ctx.queue.push(Command::QuerySensors);
        assert_eq!(h.worker_loop.step(), Some(Disposition::Published));

        h.sim.set_responsive(false);
        h.ctx.queue.push(Command::QuerySensors);
        let start = Instant::now();
        assert_eq!(h.worker_loop.step(), Some(Disposition::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(100));

        assert_eq!(h.ctx.cache.published_count(), 1);
        assert_eq!(h.ctx.counters.snapshot().query_timeouts, 1);
    }

    #[test]
    fn test_control_command_is_written() {
        let h = harness(fast_config());
        assert!(h.ctx.connection.open(None));

        h.ctx.queue.push(lamp_on("2"));
        assert_eq!(h.worker_loop.step(), Some(Disposition::Written));
        assert_eq!(h.sim.lamp("2"), Some(true));
        assert!(h.ctx.queue.is_empty());
    }

    #[test]
    fn test_disconnected_defers() {
        let h = harness(fast_config());

        h.ctx.queue.push(lamp_on("1"));
        assert_eq!(h.worker_loop.step(), Some(Disposition::Deferred));
        assert_eq!(h.ctx.queue.len(), 1);
        assert!(h.sim.received().is_empty());

        let queued = h.ctx.queue.try_pop().unwrap();
        assert_eq!(queued.deferrals, 1);
        assert_eq!(queued.attempts, 0);
    }

    #[test]
    fn test_write_fault_closes_and_requeues() {
        let h = harness(fast_config());
        assert!(h.ctx.connection.open(None));
        h.sim.fail_next_writes(1);

        h.ctx.queue.push(lamp_on("1"));
        assert_eq!(h.worker_loop.step(), Some(Disposition::Faulted));
        assert!(!h.ctx.connection.is_connected());
        assert_eq!(h.ctx.queue.len(), 1);

        let stats = h.ctx.counters.snapshot();
        assert_eq!(stats.link_faults, 1);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.commands_written, 0);

        assert!(h.ctx.connection.open(None));
        assert_eq!(h.worker_loop.step(), Some(Disposition::Written));
        assert_eq!(h.sim.received_count("lampon1"), 1);
    }

    #[test]
    fn test_read_fault_closes_and_requeues() {
        let h = harness(fast_config());
        assert!(h.ctx.connection.open(None));
        h.sim.fail_next_reads(1);

        h.ctx.queue.push(Command::QuerySensors);
        assert_eq!(h.worker_loop.step(), Some(Disposition::Faulted));
        assert!(!h.ctx.connection.is_connected());
        assert_eq!(h.ctx.queue.try_pop().unwrap().attempts, 1);
        assert_eq!(h.ctx.cache.latest(), None);
    }

    #[test]
    fn test_dead_letter_after_max_attempts() {
        let h = harness(fast_config().with_retry_limits(2, None));
        h.sim.fail_next_writes(10);

        h.ctx.queue.push(lamp_on("1"));
        assert!(h.ctx.connection.open(None));
        assert_eq!(h.worker_loop.step(), Some(Disposition::Faulted));
        assert!(h.ctx.connection.open(None));
        assert_eq!(h.worker_loop.step(), Some(Disposition::DeadLettered));

        assert!(h.ctx.queue.is_empty());
        assert_eq!(h.ctx.counters.snapshot().dead_lettered, 1);
    }

    #[test]
    fn test_dead_letter_after_max_queue_age() {
        let h = harness(fast_config().with_retry_limits(5, Some(Duration::from_millis(10))));

        h.ctx.queue.push(lamp_on("1"));
        assert_eq!(h.worker_loop.step(), Some(Disposition::Deferred));
        assert_eq!(h.worker_loop.step(), Some(Disposition::Deferred));

        thread::sleep(Duration::from_millis(15));
        assert_eq!(h.worker_loop.step(), Some(Disposition::DeadLettered));
        assert!(h.ctx.queue.is_empty());
        assert_eq!(h.ctx.counters.snapshot().dead_lettered, 1);
    }

    #[test]
    fn test_queue_levels_off_while_disconnected() {
        let h = harness(fast_config().with_retry_limits(5, Some(Duration::from_millis(20))));

        let mut deepest = 0;
        for _ in 0..1000 {
            h.ctx.queue.push(lamp_on("1"));
            h.ctx.queue.push(Command::QuerySensors);
            assert!(h.worker_loop.step().is_some());
            deepest = deepest.max(h.ctx.queue.len());
        }

        assert!(deepest < 100, "queue grew to {}", deepest);
        assert!(h.ctx.counters.snapshot().dead_lettered > 0);
        assert!(h.sim.received().is_empty());
    }

    #[test]
    fn test_no_age_limit_keeps_everything() {
        let h = harness(fast_config().with_retry_limits(5, None));

        for _ in 0..20 {
            h.ctx.queue.push(lamp_on("1"));
            assert_eq!(h.worker_loop.step(), Some(Disposition::Deferred));
        }
        assert_eq!(h.ctx.queue.len(), 20);
        assert_eq!(h.ctx.counters.snapshot().dead_lettered, 0);
    }

    #[test]
    fn test_worker_thread_stops() {
        let h = harness(fast_config());
        let worker = Worker::spawn(h.ctx.clone()).unwrap();
        assert!(worker.is_running());

        assert!(h.ctx.connection.open(None));
        h.ctx.queue.push(lamp_on("4"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while h.sim.lamp("4").is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(h.sim.lamp("4"), Some(true));

        worker.stop();
    }
}
