//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Connect handler metrics
    pub static ref CONNECT_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("grantgate_connect_requests_total", "Total number of OAuth connect requests"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref CONNECT_SETUPS_TOTAL: IntCounter = IntCounter::new(
        "grantgate_connect_setups_total",
        "Total number of completed OAuth handler setups"
    ).expect("metric can be created");

    // Login metrics
    pub static ref LOGINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("grantgate_logins_total", "Total number of login attempts"),
        &["method", "result"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("grantgate_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(CONNECT_REQUESTS_TOTAL.clone()))
        .expect("CONNECT_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CONNECT_SETUPS_TOTAL.clone()))
        .expect("CONNECT_SETUPS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(LOGINS_TOTAL.clone()))
        .expect("LOGINS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
