//! Metrics infrastructure for the controller link.
//!
//! This crate declares every metric the link emits as a structured [`Metric`]
//! constant so names, units and label keys live in one place. It re-exports
//! the `metrics` crate; without an installed recorder all emission is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! use hydro_metrics::{metric_defs, describe_metrics, MetricLabels};
//!
//! describe_metrics();
//!
//! let labels = MetricLabels::new("/dev/ttyACM0");
//! metrics::counter!(
//!     metric_defs::COMMANDS_WRITTEN.name,
//!     labels.with(&[("kind", "control".to_string())]).as_slice()
//! )
//! .increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use hydro_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const LAMP_TOGGLES: Metric = Metric::counter("hydro.lamp.toggles")
///     .with_description("Lamp state changes")
///     .with_unit(Unit::Count)
///     .with_labels(&["port", "channel"]);
///
/// assert_eq!(LAMP_TOGGLES.name, "hydro.lamp.toggles");
/// assert_eq!(LAMP_TOGGLES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "hydro.link.faults").
    pub name: &'static str,
    /// The kind of metric (counter, gauge, histogram).
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the metrics recorder.
    ///
    /// This should be called once at startup for each metric.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the controller link.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Standard labels present on all link metrics.
    pub const STANDARD_LABELS: &[&str] = &["port"];

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connection attempts, by outcome (`connected`, `already_connected`,
    /// `port_not_found`, `failed`).
    pub const CONNECT_ATTEMPTS: Metric = Metric::counter("hydro.link.connect_attempts")
        .with_description("Serial connect attempts")
        .with_unit(Unit::Count)
        .with_labels(&["port", "outcome"]);

    /// Write/read faults on an open link. Each fault tears the link down.
    pub const LINK_FAULTS: Metric = Metric::counter("hydro.link.faults")
        .with_description("I/O faults on an open serial link")
        .with_unit(Unit::Count)
        .with_labels(&["port", "direction"]);

    /// 1 while the link is open, 0 otherwise.
    pub const LINK_CONNECTED: Metric = Metric::gauge("hydro.link.connected")
        .with_description("Whether the serial link is open")
        .with_labels(&["port"]);

    // ========================================================================
    // Command Queue
    // ========================================================================

    /// Commands accepted into the queue.
    pub const COMMANDS_ENQUEUED: Metric = Metric::counter("hydro.queue.enqueued")
        .with_description("Commands enqueued for the worker")
        .with_unit(Unit::Count)
        .with_labels(&["port", "kind"]);

    /// Commands written to the link, by path (`worker` or `immediate`).
    pub const COMMANDS_WRITTEN: Metric = Metric::counter("hydro.queue.written")
        .with_description("Commands written to the serial link")
        .with_unit(Unit::Count)
        .with_labels(&["port", "kind", "path"]);

    /// Commands pushed back to the tail, by reason (`disconnected` or `fault`).
    pub const COMMANDS_REQUEUED: Metric = Metric::counter("hydro.queue.requeued")
        .with_description("Commands requeued for a later retry")
        .with_unit(Unit::Count)
        .with_labels(&["port", "kind", "reason"]);

    /// Commands dropped after exhausting their retry budget.
    pub const COMMANDS_DEAD_LETTERED: Metric = Metric::counter("hydro.queue.dead_lettered")
        .with_description("Commands dropped after exhausting their retry budget")
        .with_unit(Unit::Count)
        .with_labels(&["port", "kind", "reason"]);

    /// Number of commands waiting in the queue.
    pub const QUEUE_DEPTH: Metric = Metric::gauge("hydro.queue.depth")
        .with_description("Commands waiting in the queue")
        .with_unit(Unit::Count)
        .with_labels(&["port"]);

    // ========================================================================
    // Sensor Readings
    // ========================================================================

    /// Sensor reports decoded and published to the cache.
    pub const READINGS_PUBLISHED: Metric = Metric::counter("hydro.sensor.readings")
        .with_description("Sensor reports decoded and published")
        .with_unit(Unit::Count)
        .with_labels(&["port"]);

    /// Lines received while waiting for a report that were not a valid report.
    pub const NOISE_LINES: Metric = Metric::counter("hydro.sensor.noise_lines")
        .with_description("Controller lines discarded as noise")
        .with_unit(Unit::Count)
        .with_labels(&["port"]);

    /// Sensor queries whose response deadline elapsed without a valid report.
    pub const QUERY_TIMEOUTS: Metric = Metric::counter("hydro.sensor.query_timeouts")
        .with_description("Sensor queries without a valid report before the deadline")
        .with_unit(Unit::Count)
        .with_labels(&["port"]);

    /// Time from queueing `GET_SENSORS` to decoding the report.
    pub const RESPONSE_LATENCY: Metric = Metric::histogram("hydro.sensor.response_latency_ms")
        .with_description("Latency from sensor query to decoded report")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["port"]);

    /// All metrics, for registration at startup.
    pub const ALL: &[&Metric] = &[
        &CONNECT_ATTEMPTS,
        &LINK_FAULTS,
        &LINK_CONNECTED,
        &COMMANDS_ENQUEUED,
        &COMMANDS_WRITTEN,
        &COMMANDS_REQUEUED,
        &COMMANDS_DEAD_LETTERED,
        &QUEUE_DEPTH,
        &READINGS_PUBLISHED,
        &NOISE_LINES,
        &QUERY_TIMEOUTS,
        &RESPONSE_LATENCY,
    ];
}

/// Labels identifying the link a metric belongs to.
///
/// ```rust
/// use hydro_metrics::MetricLabels;
///
/// let labels = MetricLabels::new("/dev/ttyACM0");
/// let extended = labels.with(&[("kind", "control".to_string())]);
/// assert_eq!(extended.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Serial port the link is bound to.
    pub port: String,
}

impl MetricLabels {
    /// Creates labels for the given port.
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("port", self.port.clone())]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all link metrics.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus exporter listening on `addr` and describe all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
