//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chatfed_http_requests_total", "Total number of HTTP requests"),
        &["method", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "chatfed_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref FEDERATION_OBJECTS_RENDERED: IntCounterVec = IntCounterVec::new(
        Opts::new("chatfed_federation_objects_rendered_total", "Total number of local entities rendered as ActivityPub objects"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref FEDERATION_OBJECTS_INGESTED: IntCounterVec = IntCounterVec::new(
        Opts::new("chatfed_federation_objects_ingested_total", "Total number of ActivityPub objects turned into local entities"),
        &["kind", "outcome"]
    ).expect("metric can be created");
    pub static ref SIGNING_KEYS_GENERATED: IntCounter = IntCounter::new(
        "chatfed_signing_keys_generated_total",
        "Total number of RSA signing keys generated for local actors"
    ).expect("metric can be created");
    pub static ref FEDERATION_IDENTITIES: IntGauge = IntGauge::new(
        "chatfed_federation_identities",
        "Number of federation identity records seen at the last nodeinfo request"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chatfed_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
            .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_OBJECTS_RENDERED.clone()))
            .expect("FEDERATION_OBJECTS_RENDERED can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_OBJECTS_INGESTED.clone()))
            .expect("FEDERATION_OBJECTS_INGESTED can be registered");
        REGISTRY
            .register(Box::new(SIGNING_KEYS_GENERATED.clone()))
            .expect("SIGNING_KEYS_GENERATED can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_IDENTITIES.clone()))
            .expect("FEDERATION_IDENTITIES can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init_metrics();
        init_metrics();

        SIGNING_KEYS_GENERATED.inc();
        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"chatfed_signing_keys_generated_total".to_string()));
    }
}
