//! # Reconcilers
//!
//! One reconciler per resource kind. Each receives an object key, fetches the
//! current object from the [`ResourceStore`](crate::controller::store::ResourceStore)
//! and writes status back with optimistic concurrency.

pub mod certificate_request;
pub mod credentials;
pub mod issuer;
pub mod status;
pub mod types;

pub use certificate_request::CertificateRequestReconciler;
pub use issuer::IssuerReconciler;
pub use types::*;
