//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Authentication Metrics
    pub static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("confab_auth_attempts_total", "Authentication attempts by method and outcome"),
        &["method", "outcome"]
    ).expect("metric can be created");
    pub static ref SESSIONS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "confab_auth_sessions_created_total",
        "Total number of web sessions issued"
    ).expect("metric can be created");
    pub static ref API_KEYS_ISSUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("confab_auth_api_keys_issued_total", "API keys issued by issuance path"),
        &["source"]
    ).expect("metric can be created");

    // Device Flow Metrics
    pub static ref DEVICE_CODES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("confab_device_codes_total", "Device code lifecycle events"),
        &["event"]
    ).expect("metric can be created");

    // Maintenance Metrics
    pub static ref EXPIRED_ROWS_PRUNED: IntGauge = IntGauge::new(
        "confab_auth_expired_rows_pruned",
        "Rows removed by the most recent cleanup run"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("confab_auth_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; duplicate registrations are logged and skipped.
pub fn init_metrics() {
    let collectors: Vec<(&str, Box<dyn prometheus::core::Collector>)> = vec![
        ("AUTH_ATTEMPTS_TOTAL", Box::new(AUTH_ATTEMPTS_TOTAL.clone())),
        ("SESSIONS_CREATED_TOTAL", Box::new(SESSIONS_CREATED_TOTAL.clone())),
        ("API_KEYS_ISSUED_TOTAL", Box::new(API_KEYS_ISSUED_TOTAL.clone())),
        ("DEVICE_CODES_TOTAL", Box::new(DEVICE_CODES_TOTAL.clone())),
        ("EXPIRED_ROWS_PRUNED", Box::new(EXPIRED_ROWS_PRUNED.clone())),
        ("ERRORS_TOTAL", Box::new(ERRORS_TOTAL.clone())),
    ];

    for (name, collector) in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::debug!(metric = name, %error, "Metric already registered");
        }
    }

    tracing::info!("Metrics registry initialized");
}

/// Record one authentication attempt.
pub fn record_auth_attempt(method: &str, outcome: &str) {
    AUTH_ATTEMPTS_TOTAL
        .with_label_values(&[method, outcome])
        .inc();
}
