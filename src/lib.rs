//! # Origin CA Issuer
//!
//! A cert-manager external issuer that signs `CertificateRequest`s through the
//! Cloudflare Origin CA API.
//!
//! ## Overview
//!
//! 1. **Issuers** - `OriginIssuer` (namespaced) and `ClusterOriginIssuer`
//!    (cluster-scoped) name a Secret holding an Origin CA service key. The
//!    issuer reconciler checks the key against the API and publishes `Ready`.
//! 2. **Certificate requests** - requests that reference one of these issuers
//!    are validated locally, signed by the Origin CA and completed with the
//!    certificate chain and CA certificate.
//!
//! ## Features
//!
//! - **Approval gate**: only `Approved` requests are signed (can be disabled)
//! - **Strict CSR validation**: requested hostnames must match the CSR exactly
//! - **Retry with backoff**: transient CA failures are retried with exponential
//!   backoff honoring `Retry-After`, then fail for good
//! - **Idempotent signing**: retries carry a stable idempotency key
//! - **Prometheus metrics** and health probes

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod runtime;

pub use crd::*;
