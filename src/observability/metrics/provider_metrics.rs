//! # Provider Metrics
//!
//! Origin CA API calls by operation and outcome.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec};
use std::sync::LazyLock;

static CA_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "origin_ca_issuer_ca_requests_total",
            "Total number of Origin CA API requests by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create CA_REQUESTS_TOTAL metric - this should never happen")
});

static CA_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "origin_ca_issuer_ca_request_duration_seconds",
            "Duration of Origin CA API requests in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .expect("Failed to create CA_REQUEST_DURATION metric - this should never happen")
});

pub(super) fn register_provider_metrics() -> Result<()> {
    REGISTRY.register(Box::new(CA_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CA_REQUEST_DURATION.clone()))?;
    Ok(())
}

/// Record one Origin CA call
///
/// `outcome` is `success` or the error kind (`authentication`, `rate_limit`, ...).
pub fn observe_ca_request(operation: &str, outcome: &str, duration_secs: f64) {
    CA_REQUESTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    CA_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}
