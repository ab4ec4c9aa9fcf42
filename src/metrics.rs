//! Prometheus metrics for the client runtime.
//!
//! Metrics cover:
//! - Produce path (messages accepted, delivery outcomes, queue-full rejections, retries)
//! - Consume path (records returned, rebalances, commits)
//! - Admin requests and metadata refreshes
//! - Event queue dispatch
//!
//! All metrics are registered to a custom registry with the
//! `kafkaesque_client` prefix so they never collide with the application's own
//! default registry. Registration failures are logged and the metric keeps
//! working unregistered.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for client metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("kafkaesque_client".to_string()), None)
        .unwrap_or_else(|_| Registry::new())
});

// Declaration macros; each expands to a Lazy static with safe registration.

macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Producer
// =============================================================================

define_counter_vec!(
    MESSAGES_PRODUCED,
    "messages_produced_total",
    "Messages accepted by produce()",
    ["topic"]
);
define_counter_vec!(
    DELIVERY_REPORTS,
    "delivery_reports_total",
    "Delivery reports dispatched, by outcome",
    ["topic", "status"]
);
define_counter!(
    QUEUE_FULL_REJECTIONS,
    "queue_full_rejections_total",
    "produce() calls rejected because the local queue was full"
);
define_counter_vec!(
    RETRIES,
    "retries_total",
    "Requests retried after a transient error",
    ["api"]
);
define_gauge!(
    OUTSTANDING_MESSAGES,
    "outstanding_messages",
    "Messages produced but not yet reported"
);
define_histogram_vec!(
    DELIVERY_LATENCY,
    "delivery_latency_seconds",
    "Time from produce() to delivery report",
    ["status"],
    [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0]
);

// =============================================================================
// Consumer
// =============================================================================

define_counter_vec!(
    RECORDS_CONSUMED,
    "records_consumed_total",
    "Records returned from consumer poll()",
    ["topic"]
);
define_counter_vec!(
    REBALANCES,
    "rebalances_total",
    "Rebalance callbacks invoked",
    ["kind"]
);
define_counter_vec!(
    OFFSET_COMMITS,
    "offset_commits_total",
    "Offset commit requests, by mode and status",
    ["mode", "status"]
);

// =============================================================================
// Admin, metadata and event queue
// =============================================================================

define_counter_vec!(
    ADMIN_REQUESTS,
    "admin_requests_total",
    "Admin operations, by operation and status",
    ["operation", "status"]
);
define_counter_vec!(
    METADATA_REFRESHES,
    "metadata_refreshes_total",
    "Metadata refresh attempts",
    ["status"]
);
define_counter_vec!(
    EVENTS_DISPATCHED,
    "events_dispatched_total",
    "Engine events drained from the event queue",
    ["kind"]
);

// =============================================================================
// Safe registration
// =============================================================================

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    if let Err(e) = registry.register(Box::new(gauge.clone())) {
        warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
    }
    gauge
}

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
    }
    counter
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
    }
    counter
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(histogram.clone())) {
        warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
    }
    histogram
}

/// Force registration of every metric so they appear in the first scrape.
pub fn init_metrics() {
    let _ = &*MESSAGES_PRODUCED;
    let _ = &*DELIVERY_REPORTS;
    let _ = &*QUEUE_FULL_REJECTIONS;
    let _ = &*RETRIES;
    let _ = &*OUTSTANDING_MESSAGES;
    let _ = &*DELIVERY_LATENCY;
    let _ = &*RECORDS_CONSUMED;
    let _ = &*REBALANCES;
    let _ = &*OFFSET_COMMITS;
    let _ = &*ADMIN_REQUESTS;
    let _ = &*METADATA_REFRESHES;
    let _ = &*EVENTS_DISPATCHED;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn status(ok: bool) -> &'static str {
    if ok { "success" } else { "error" }
}

pub(crate) fn record_produce(topic: &str) {
    MESSAGES_PRODUCED.with_label_values(&[topic]).inc();
    OUTSTANDING_MESSAGES.inc();
}

pub(crate) fn record_delivery(topic: &str, ok: bool, latency_secs: f64) {
    let status = status(ok);
    DELIVERY_REPORTS.with_label_values(&[topic, status]).inc();
    DELIVERY_LATENCY
        .with_label_values(&[status])
        .observe(latency_secs);
    OUTSTANDING_MESSAGES.dec();
}

pub(crate) fn record_queue_full() {
    QUEUE_FULL_REJECTIONS.inc();
}

pub(crate) fn record_retry(api: &str) {
    RETRIES.with_label_values(&[api]).inc();
}

pub(crate) fn record_consumed(topic: &str) {
    RECORDS_CONSUMED.with_label_values(&[topic]).inc();
}

pub(crate) fn record_rebalance(kind: &str) {
    REBALANCES.with_label_values(&[kind]).inc();
}

pub(crate) fn record_commit(mode: &str, ok: bool) {
    OFFSET_COMMITS.with_label_values(&[mode, status(ok)]).inc();
}

pub(crate) fn record_admin(operation: &str, ok: bool) {
    ADMIN_REQUESTS
        .with_label_values(&[operation, status(ok)])
        .inc();
}

pub(crate) fn record_metadata_refresh(ok: bool) {
    METADATA_REFRESHES.with_label_values(&[status(ok)]).inc();
}

pub(crate) fn record_event(kind: &str) {
    EVENTS_DISPATCHED.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_prefix() {
        init_metrics();
        record_retry("produce");
        let text = encode_metrics().unwrap();
        assert!(text.contains("kafkaesque_client_retries_total"));
    }

    #[test]
    fn test_delivery_counters_by_status() {
        let before = DELIVERY_REPORTS
            .with_label_values(&["metrics-test", "error"])
            .get();
        record_produce("metrics-test");
        record_delivery("metrics-test", false, 0.01);
        let after = DELIVERY_REPORTS
            .with_label_values(&["metrics-test", "error"])
            .get();
        assert_eq!(after, before + 1);
    }
}
