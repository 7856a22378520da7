//! # Controller
//!
//! Reconcilers for issuers and certificate requests, the store they read and
//! write through, and the metrics/probe HTTP server.

pub mod backoff;
pub mod clock;
pub mod conditions;
pub mod reconciler;
pub mod server;
pub mod store;

#[cfg(test)]
pub mod testing;
