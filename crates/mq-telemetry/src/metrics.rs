//! Prometheus metrics for the messaging core.
//!
//! All metrics follow the naming convention: `mq_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: produced/consumed messages, failures
//! - **Gauge**: running subscriptions
//! - **Histogram**: operation latency

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter,
    Opts, Registry, TextEncoder,
};
use std::time::Instant;

use crate::TelemetryError;

lazy_static! {
    /// Metrics registry owned by this crate
    pub static ref REGISTRY: Registry = Registry::new();

    /// Messages successfully produced, by broker type
    pub static ref MESSAGES_PRODUCED: CounterVec = CounterVec::new(
        Opts::new("mq_messages_produced_total", "Messages successfully produced"),
        &["broker"]
    ).expect("metric creation failed");

    /// Produce calls that failed, by broker type
    pub static ref PRODUCE_FAILURES: CounterVec = CounterVec::new(
        Opts::new("mq_produce_failures_total", "Produce calls that failed"),
        &["broker"]
    ).expect("metric creation failed");

    /// Messages delivered by consume loops, by broker type
    pub static ref MESSAGES_CONSUMED: CounterVec = CounterVec::new(
        Opts::new("mq_messages_consumed_total", "Messages delivered by consume loops"),
        &["broker"]
    ).expect("metric creation failed");

    /// Consume loops that ended abnormally
    pub static ref CONSUMER_ERRORS: IntCounter = IntCounter::new(
        "mq_consumer_errors_total",
        "Consume loops that ended with a genuine failure"
    ).expect("metric creation failed");

    /// Currently running subscriptions
    pub static ref ACTIVE_SUBSCRIPTIONS: Gauge = Gauge::new(
        "mq_active_subscriptions",
        "Number of running consume loops"
    ).expect("metric creation failed");

    /// Latency of public operations
    pub static ref OPERATION_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "mq_operation_latency_seconds",
            "Latency of produce, admin and test operations"
        ).buckets(exponential_buckets(0.001, 2.0, 15).expect("valid buckets")),
        &["operation"]
    ).expect("metric creation failed");
}

/// Handle proving the metrics were registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

/// Register all metrics. Safe to call more than once.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_PRODUCED.clone()),
        Box::new(PRODUCE_FAILURES.clone()),
        Box::new(MESSAGES_CONSUMED.clone()),
        Box::new(CONSUMER_ERRORS.clone()),
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
        Box::new(OPERATION_LATENCY.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _private: () })
}

/// Encode all metrics as Prometheus text format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Count one produce outcome.
pub fn record_produce(broker: &str, success: bool) {
    if success {
        MESSAGES_PRODUCED.with_label_values(&[broker]).inc();
    } else {
        PRODUCE_FAILURES.with_label_values(&[broker]).inc();
    }
}

pub fn record_consumed(broker: &str) {
    MESSAGES_CONSUMED.with_label_values(&[broker]).inc();
}

pub fn record_consumer_error() {
    CONSUMER_ERRORS.inc();
}

pub fn set_active_subscriptions(count: usize) {
    ACTIVE_SUBSCRIPTIONS.set(count as f64);
}

/// Timer guard observing [`OPERATION_LATENCY`] on drop.
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        OPERATION_LATENCY
            .with_label_values(&[self.operation])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_produce_counters() {
        record_produce("kafka", true);
        record_produce("kafka", false);
        assert!(MESSAGES_PRODUCED.with_label_values(&["kafka"]).get() >= 1.0);
        assert!(PRODUCE_FAILURES.with_label_values(&["kafka"]).get() >= 1.0);
    }

    #[test]
    fn test_gather_contains_registered_metric() {
        register_metrics().unwrap();
        record_consumed("rabbitmq");
        let text = gather_text().unwrap();
        assert!(text.contains("mq_messages_consumed_total"));
    }

    #[test]
    fn test_operation_timer_observes() {
        {
            let _timer = OperationTimer::start("unit_test");
        }
        assert!(
            OPERATION_LATENCY
                .with_label_values(&["unit_test"])
                .get_sample_count()
                >= 1
        );
    }
}
