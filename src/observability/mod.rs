//! # Observability
//!
//! Prometheus metrics for the controllers and the Origin CA client.

pub mod metrics;
