//! # Provider
//!
//! Signing backends. The reconcilers only see the [`Signer`] and
//! [`SignerFactory`] traits; [`origin_ca`] is the production implementation.

pub mod origin_ca;

use async_trait::async_trait;
use origin_ca::{CaError, ServiceKey, SignRequest, SignedCertificate};
use std::sync::Arc;

/// A CA client bound to one credential
#[async_trait]
pub trait Signer: Send + Sync {
    /// Submit a validated signing request
    async fn sign(&self, request: &SignRequest) -> Result<SignedCertificate, CaError>;

    /// Lightweight call that proves the credential is accepted
    async fn verify_credentials(&self) -> Result<(), CaError>;
}

/// Builds a [`Signer`] for a resolved credential
pub trait SignerFactory: Send + Sync {
    /// Construct a signer; an error means the credential is unusable
    fn signer(&self, service_key: ServiceKey) -> Result<Arc<dyn Signer>, CaError>;
}
