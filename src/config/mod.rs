//! # Controller Configuration
//!
//! Command line flags (with environment variable fallbacks, populated from a
//! ConfigMap via `envFrom`) and HTTP server settings.

mod controller;
mod server;

pub use controller::{ConfigError, ControllerConfig};
pub use server::ServerConfig;
