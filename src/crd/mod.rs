//! # Custom Resource Definitions
//!
//! Resource types for the Origin CA issuer.
//!
//! - [`OriginIssuer`] / [`ClusterOriginIssuer`] are owned by this controller
//! - [`CertificateRequest`] is owned by cert-manager and modeled as a narrow
//!   consumed/produced contract

mod certificate_request;
mod issuer;
mod status;

pub use certificate_request::*;
pub use issuer::*;
pub use status::*;
