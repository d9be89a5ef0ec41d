//! Metric emission for the link.
//!
//! Thin wrappers over [`hydro_metrics::metric_defs`] so call sites stay one line.

use hydro_metrics::{metric_defs, MetricLabels};
use hydro_protocol::CommandKind;

pub(crate) fn connect_attempt(port: &str, outcome: &'static str) {
    let labels = MetricLabels::new(port).with(&[("outcome", outcome.to_string())]);
    metrics::counter!(metric_defs::CONNECT_ATTEMPTS.name, labels.as_slice()).increment(1);
}

pub(crate) fn connected(port: &str, connected: bool) {
    let labels = MetricLabels::new(port).to_labels();
    let value = if connected { 1.0 } else { 0.0 };
    metrics::gauge!(metric_defs::LINK_CONNECTED.name, labels.as_slice()).set(value);
}

pub(crate) fn link_fault(port: &str, direction: &'static str) {
    let labels = MetricLabels::new(port).with(&[("direction", direction.to_string())]);
    metrics::counter!(metric_defs::LINK_FAULTS.name, labels.as_slice()).increment(1);
}

pub(crate) fn enqueued(port: &str, kind: CommandKind, depth: usize) {
    let labels = MetricLabels::new(port).with(&[("kind", kind.to_string())]);
    metrics::counter!(metric_defs::COMMANDS_ENQUEUED.name, labels.as_slice()).increment(1);
    queue_depth(port, depth);
}

pub(crate) fn written(port: &str, kind: CommandKind, path: &'static str) {
    let labels = MetricLabels::new(port)
        .with(&[("kind", kind.to_string()), ("path", path.to_string())]);
    metrics::counter!(metric_defs::COMMANDS_WRITTEN.name, labels.as_slice()).increment(1);
}

pub(crate) fn requeued(port: &str, kind: CommandKind, reason: &'static str) {
    let labels = MetricLabels::new(port)
        .with(&[("kind", kind.to_string()), ("reason", reason.to_string())]);
    metrics::counter!(metric_defs::COMMANDS_REQUEUED.name, labels.as_slice()).increment(1);
}

pub(crate) fn dead_lettered(port: &str, kind: CommandKind, reason: &'static str) {
    let labels = MetricLabels::new(port)
        .with(&[("kind", kind.to_string()), ("reason", reason.to_string())]);
    metrics::counter!(metric_defs::COMMANDS_DEAD_LETTERED.name, labels.as_slice()).increment(1);
}

pub(crate) fn queue_depth(port: &str, depth: usize) {
    let labels = MetricLabels::new(port).to_labels();
    metrics::gauge!(metric_defs::QUEUE_DEPTH.name, labels.as_slice()).set(depth as f64);
}

pub(crate) fn reading_published(port: &str, latency_ms: f64) {
    let labels = MetricLabels::new(port).to_labels();
    metrics::counter!(metric_defs::READINGS_PUBLISHED.name, labels.as_slice()).increment(1);
    metrics::histogram!(metric_defs::RESPONSE_LATENCY.name, labels.as_slice()).record(latency_ms);
}

pub(crate) fn noise_line(port: &str) {
    let labels = MetricLabels::new(port).to_labels();
    metrics::counter!(metric_defs::NOISE_LINES.name, labels.as_slice()).increment(1);
}

pub(crate) fn query_timeout(port: &str) {
    let labels = MetricLabels::new(port).to_labels();
    metrics::counter!(metric_defs::QUERY_TIMEOUTS.name, labels.as_slice()).increment(1);
}
