//! Prometheus metrics for credits-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter, TextEncoder,
};
use std::sync::OnceLock;

/// Ledger operation counter by operation and outcome.
pub static LEDGER_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credits_ledger_operations_total",
        "Total number of ledger operations",
        &["operation", "outcome"] // debit/credit, ok/insufficient/error
    )
    .expect("Failed to register ledger_operations_total")
});

/// Credits removed from balances.
pub static CREDITS_DEBITED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "credits_debited_total",
        "Total number of credits debited"
    )
    .expect("Failed to register credits_debited_total")
});

/// Credits added to balances.
pub static CREDITS_CREDITED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "credits_credited_total",
        "Total number of credits credited"
    )
    .expect("Failed to register credits_credited_total")
});

/// Quota rejections by quota (no tenant label).
pub static QUOTA_REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credits_quota_rejections_total",
        "Total number of operations rejected by a plan ceiling",
        &["quota"] // storage, patients
    )
    .expect("Failed to register quota_rejections_total")
});

/// Transcription workflow runs by outcome.
pub static PROCESSING_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credits_processing_runs_total",
        "Total number of session processing runs",
        &["outcome"]
    )
    .expect("Failed to register processing_runs_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "credits_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Store query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "credits_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Recorder behind the `metrics` facade used by the shared HTTP middleware.
static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn install_http_recorder() -> PrometheusHandle {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::warn!(error = %e, "Global metrics recorder already installed");
    }

    handle
}

/// Initialize all metrics (forces lazy initialization).
///
/// Safe to call more than once; the facade recorder is installed on first use.
pub fn init_metrics() {
    HTTP_METRICS_HANDLE.get_or_init(install_http_recorder);
    Lazy::force(&LEDGER_OPERATIONS_TOTAL);
    Lazy::force(&CREDITS_DEBITED_TOTAL);
    Lazy::force(&CREDITS_CREDITED_TOTAL);
    Lazy::force(&QUOTA_REJECTIONS_TOTAL);
    Lazy::force(&PROCESSING_RUNS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
///
/// Service metrics from the default registry, followed by the per-request
/// HTTP metrics recorded through the facade.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut body = encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default();

    if let Some(handle) = HTTP_METRICS_HANDLE.get() {
        body.push_str(&handle.render());
    }

    body
}
