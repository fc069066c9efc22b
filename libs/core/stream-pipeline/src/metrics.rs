//! Prometheus metrics for producer daemons and consumers
//!
//! Metrics go through the `metrics` facade. Install the Prometheus recorder once
//! with [`init_metrics`] and expose [`render_metrics`] over HTTP.

use messaging::{ErrorCategory, StreamError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), StreamError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| StreamError::config(format!("failed to install Prometheus recorder: {e}")))?;
        info!("Prometheus metrics initialized");
        Ok::<_, StreamError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Producer daemon metrics, labelled by daemon name
#[derive(Debug, Clone)]
pub struct DaemonMetrics {
    daemon: String,
}

impl DaemonMetrics {
    pub fn new(daemon: impl Into<String>) -> Self {
        Self {
            daemon: daemon.into(),
        }
    }

    /// Record messages accepted by `write`
    pub fn messages_written(&self, count: usize) {
        counter!(
            "stream_producer_daemon_messages_total",
            "daemon" => self.daemon.clone()
        )
        .increment(count as u64);
    }

    /// Record the size of a batch handed to the output
    pub fn batch_size(&self, size: usize) {
        histogram!(
            "stream_producer_daemon_batch_size",
            "daemon" => self.daemon.clone()
        )
        .record(size as f64);
    }

    /// Record how many messages went into one aggregate
    pub fn aggregate_size(&self, size: usize) {
        histogram!(
            "stream_producer_daemon_aggregate_size",
            "daemon" => self.daemon.clone()
        )
        .record(size as f64);
    }

    /// Time an output worker waited for its next batch
    pub fn idle(&self, waited: Duration) {
        gauge!(
            "stream_producer_daemon_idle_seconds",
            "daemon" => self.daemon.clone()
        )
        .set(waited.as_secs_f64());
    }

    pub fn output_error(&self) {
        counter!(
            "stream_producer_daemon_output_errors_total",
            "daemon" => self.daemon.clone()
        )
        .increment(1);
    }
}

/// Consumer metrics, labelled by consumer name
#[derive(Debug, Clone)]
pub struct ConsumerMetrics {
    consumer: String,
}

impl ConsumerMetrics {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
        }
    }

    /// Record a message or batch handed to the callback
    pub fn processed(&self, count: usize, duration: Duration) {
        counter!(
            "stream_consumer_processed_total",
            "consumer" => self.consumer.clone()
        )
        .increment(count as u64);

        histogram!(
            "stream_consumer_duration_seconds",
            "consumer" => self.consumer.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn error(&self, category: ErrorCategory) {
        counter!(
            "stream_consumer_errors_total",
            "consumer" => self.consumer.clone(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn retried(&self) {
        counter!(
            "stream_consumer_retries_total",
            "consumer" => self.consumer.clone()
        )
        .increment(1);
    }

    pub fn retry_failed(&self) {
        counter!(
            "stream_consumer_retry_errors_total",
            "consumer" => self.consumer.clone()
        )
        .increment(1);
    }
}
