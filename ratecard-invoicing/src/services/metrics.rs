//! Prometheus metrics for ratecard-invoicing.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Invoices persisted, by origin (manual, recurring).
pub static INVOICES_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ratecard_invoices_created_total",
        "Total number of invoices created by origin",
        &["origin"]
    )
    .expect("Failed to register invoices_created_total")
});

/// Extracted items that matched no rate card entry.
pub static UNMATCHED_ITEMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ratecard_unmatched_items_total",
        "Total number of extracted items without a rate card match",
        &["operation"] // preview, create
    )
    .expect("Failed to register unmatched_items_total")
});

pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ratecard_payments_total",
        "Total number of payments by method",
        &["method"]
    )
    .expect("Failed to register payments_total")
});

/// Recurrence outcomes per schedule: created, failed, skipped.
pub static RECURRENCE_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ratecard_recurrence_runs_total",
        "Total number of recurring schedule runs by outcome",
        &["outcome"]
    )
    .expect("Failed to register recurrence_runs_total")
});

pub static DELIVERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ratecard_deliveries_total",
        "Total number of invoice deliveries by outcome",
        &["outcome"] // delivered, failed
    )
    .expect("Failed to register deliveries_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ratecard_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Store operation duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ratecard_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICES_CREATED_TOTAL);
    Lazy::force(&UNMATCHED_ITEMS_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&RECURRENCE_RUNS_TOTAL);
    Lazy::force(&DELIVERIES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Count an error by its variant.
pub fn record_error(err: &service_core::error::AppError) {
    use service_core::error::AppError;

    let error_type = match err {
        AppError::ValidationError(_) | AppError::InvalidField { .. } => "validation",
        AppError::BadRequest(_) => "bad_request",
        AppError::NotFound(_) => "not_found",
        AppError::NotConfigured(_) => "not_configured",
        AppError::Conflict(_) => "conflict",
        AppError::ExternalServiceError(_) => "external_service",
        AppError::DatabaseError(_) => "database",
        AppError::ConfigError(_) => "config",
        AppError::InternalError(_) => "internal",
    };
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
