//! Prometheus metrics for the intake pipeline.
//!
//! Metric names:
//! - `marquee_gateway_published_total{kind}`
//! - `marquee_gateway_publish_failures_total{kind}`
//! - `marquee_gateway_publish_duration_seconds{kind}`
//! - `marquee_worker_messages_total{kind, outcome}`
//! - `marquee_worker_store_retries_total{kind}`
//! - `marquee_worker_processing_duration_seconds{kind}`
//!
//! # Example
//!
//! ```rust,no_run
//! use marquee_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//! let body = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Gateway publishes acknowledged by the broker.
pub const GATEWAY_PUBLISHED: &str = "marquee_gateway_published_total";
/// Gateway publishes that failed after retries.
pub const GATEWAY_FAILURES: &str = "marquee_gateway_publish_failures_total";
/// Gateway publish latency including retries.
pub const GATEWAY_DURATION: &str = "marquee_gateway_publish_duration_seconds";
/// Worker terminal outcomes.
pub const WORKER_MESSAGES: &str = "marquee_worker_messages_total";
/// Worker store retries after transient errors.
pub const WORKER_STORE_RETRIES: &str = "marquee_worker_store_retries_total";
/// Worker time from receipt to terminal outcome.
pub const WORKER_DURATION: &str = "marquee_worker_processing_duration_seconds";
/// Rejections written to the ledger, counted once per intent.
pub const LEDGER_REJECTIONS: &str = "marquee_store_rejections_recorded_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
///
/// Rendered by the `/metrics` route of each service.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder").finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    /// Describe every metric and install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or a recorder is
    /// already installed.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        tracing::info!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    /// Current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn register_metrics() {
    describe_counter!(GATEWAY_PUBLISHED, "Intents durably accepted by the broker");
    describe_counter!(GATEWAY_FAILURES, "Intents the broker did not accept");
    describe_histogram!(GATEWAY_DURATION, "Time to publish an intent, including retries");
    describe_counter!(WORKER_MESSAGES, "Messages reaching a terminal outcome, by outcome");
    describe_counter!(WORKER_STORE_RETRIES, "Store retries after transient errors");
    describe_histogram!(WORKER_DURATION, "Time from receipt to terminal outcome");
    describe_counter!(LEDGER_REJECTIONS, "Terminal rejections recorded in the ledger, by reason");
}

pub(crate) fn record_published(kind: &'static str, elapsed: Duration) {
    metrics::counter!(GATEWAY_PUBLISHED, "kind" => kind).increment(1);
    metrics::histogram!(GATEWAY_DURATION, "kind" => kind).record(elapsed.as_secs_f64());
}

pub(crate) fn record_publish_failure(kind: &'static str) {
    metrics::counter!(GATEWAY_FAILURES, "kind" => kind).increment(1);
}

pub(crate) fn record_outcome(kind: &'static str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(WORKER_MESSAGES, "kind" => kind, "outcome" => outcome).increment(1);
    metrics::histogram!(WORKER_DURATION, "kind" => kind).record(elapsed.as_secs_f64());
}

pub(crate) fn record_store_retry(kind: &'static str) {
    metrics::counter!(WORKER_STORE_RETRIES, "kind" => kind).increment(1);
}

/// Count a rejection newly written to the ledger.
pub fn record_ledger_rejection(kind: &'static str, reason: &'static str) {
    metrics::counter!(LEDGER_REJECTIONS, "kind" => kind, "reason" => reason).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_rejections_are_described_and_labelled() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            record_ledger_rejection("review", "reference_not_found");
        });

        let text = handle.render();
        assert!(text.contains(&format!("# HELP {LEDGER_REJECTIONS}")));
        assert!(text.contains(r#"reason="reference_not_found""#));
    }
}
