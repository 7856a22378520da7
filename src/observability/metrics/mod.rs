//! # Metrics
//!
//! Metrics are grouped by area; each area registers its collectors with the
//! shared [`registry::REGISTRY`].

mod controller_metrics;
mod provider_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use provider_metrics::*;

use anyhow::Result;

/// Register every metric with the shared registry
///
/// Must be called once at startup, before the HTTP server serves `/metrics`.
pub fn register_metrics() -> Result<()> {
    register_controller_metrics()?;
    register_provider_metrics()?;
    Ok(())
}
