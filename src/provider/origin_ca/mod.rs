//! # Origin CA Client
//!
//! Client for the Cloudflare Origin CA API.
//!
//! A [`CaClient`] is bound to one service key and one [`CaClientConfig`] and is
//! immutable once built. It makes exactly one HTTP call per operation and never
//! retries; callers own the retry policy.
//!
//! ## Endpoints
//!
//! - `POST {endpoint}/certificates` signs a CSR
//! - `GET {endpoint}/certificates?limit=1` checks that the service key is accepted

mod csr;
mod error;
pub mod hostnames;
mod requests;
mod responses;
pub mod validity;

pub use csr::{inspect_csr, CsrNames};
pub use error::{CaError, CaErrorKind};
pub use requests::{idempotency_key, SignRequest};
pub use responses::SignedCertificate;

use crate::constants::{DEFAULT_CA_ENDPOINT, DEFAULT_CA_TIMEOUT_SECS};
use crate::observability;
use crate::provider::{Signer, SignerFactory};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use responses::{error_message, SignResponseBody};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Header carrying the Origin CA service key
pub const SERVICE_KEY_HEADER: &str = "X-Auth-User-Service-Key";

/// Header carrying the client generated idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Origin CA service key
///
/// Wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Wrap a service key that already passed credential checks
    pub fn new(key: String) -> Self {
        Self(key)
    }

    /// Raw key, for the authentication header only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServiceKey(****)")
    }
}

/// Connection settings shared by every client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaClientConfig {
    /// Base URL of the API, without trailing slash
    pub endpoint: String,
    /// Deadline for one HTTP call
    pub timeout: Duration,
}

impl Default for CaClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CA_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_CA_TIMEOUT_SECS),
        }
    }
}

/// Authenticated Origin CA client
#[derive(Debug)]
pub struct CaClient {
    http: reqwest::Client,
    endpoint: String,
    service_key: ServiceKey,
}

impl CaClient {
    /// Build a client for one service key
    ///
    /// Fails with a validation error when the key cannot be sent as a header
    /// or the HTTP client cannot be constructed.
    pub fn new(config: &CaClientConfig, service_key: ServiceKey) -> Result<Self, CaError> {
        HeaderValue::from_str(service_key.expose()).map_err(|e| {
            CaError::validation(format!("service key cannot be sent as a header: {e}"))
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("origin-ca-issuer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CaError::validation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            service_key,
        })
    }

    fn certificates_url(&self) -> String {
        format!("{}/certificates", self.endpoint)
    }

    fn auth_header(&self) -> Result<HeaderValue, CaError> {
        let mut value = HeaderValue::from_str(self.service_key.expose())
            .map_err(|e| CaError::validation(format!("service key is not a valid header value: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Sign a validated request
    pub async fn sign(&self, request: &SignRequest) -> Result<SignedCertificate, CaError> {
        let started = Instant::now();
        let result = self.send_sign(request).await;
        record_outcome("sign", &result, started);
        result
    }

    async fn send_sign(&self, request: &SignRequest) -> Result<SignedCertificate, CaError> {
        debug!(
            hostnames = ?request.hostnames(),
            request_type = request.request_type().as_str(),
            validity_days = request.validity_days(),
            "Submitting CSR to Origin CA"
        );

        let mut builder = self
            .http
            .post(self.certificates_url())
            .header(SERVICE_KEY_HEADER, self.auth_header()?)
            .json(&request.body());
        if let Some(key) = request.idempotency_key() {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CaError::from_status(status, error_message(&body), retry_after));
        }

        serde_json::from_str::<SignResponseBody>(&body)
            .map(SignResponseBody::into_certificate)
            .map_err(|e| CaError::server(format!("malformed signing response: {e}")))
    }

    /// Check that the service key is accepted
    pub async fn verify_credentials(&self) -> Result<(), CaError> {
        let started = Instant::now();
        let result = self.send_verify().await;
        record_outcome("verify", &result, started);
        result
    }

    async fn send_verify(&self) -> Result<(), CaError> {
        let response = self
            .http
            .get(self.certificates_url())
            .query(&[("limit", "1")])
            .header(SERVICE_KEY_HEADER, self.auth_header()?)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body = response.text().await.unwrap_or_default();
        Err(CaError::from_status(status, error_message(&body), retry_after))
    }
}

fn record_outcome<T>(operation: &str, result: &Result<T, CaError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.kind.as_str(),
    };
    if let Err(e) = result {
        warn!(operation, kind = e.kind.as_str(), error = %e, "Origin CA request failed");
    }
    observability::metrics::observe_ca_request(operation, outcome, started.elapsed().as_secs_f64());
}

/// Parse a `Retry-After` header given as seconds or an HTTP-date
pub fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    let raw = value?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

#[async_trait]
impl Signer for CaClient {
    async fn sign(&self, request: &SignRequest) -> Result<SignedCertificate, CaError> {
        CaClient::sign(self, request).await
    }

    async fn verify_credentials(&self) -> Result<(), CaError> {
        CaClient::verify_credentials(self).await
    }
}

/// Builds a [`CaClient`] per service key from shared settings
#[derive(Debug, Clone, Default)]
pub struct OriginCaSignerFactory {
    config: CaClientConfig,
}

impl OriginCaSignerFactory {
    /// Create a factory for the given settings
    pub fn new(config: CaClientConfig) -> Self {
        Self { config }
    }
}

impl SignerFactory for OriginCaSignerFactory {
    fn signer(&self, service_key: ServiceKey) -> Result<Arc<dyn Signer>, CaError> {
        Ok(Arc::new(CaClient::new(&self.config, service_key)?))
    }
}
