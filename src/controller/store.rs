//! # Resource Store
//!
//! Read and status-write access to the objects the reconcilers work on.
//!
//! Reads always go to the API server rather than a cache, so a reconciliation
//! acts on the latest version. Status writes are merge patches against the
//! status subresource carrying `metadata.resourceVersion`, so a write based on
//! a stale read fails with a conflict instead of overwriting newer state.
//!
//! Every call passes through a token-bucket [`RateLimiter`] and is bounded by a
//! deadline.

use crate::constants::FIELD_MANAGER;
use crate::controller::reconciler::{ObjectKey, ReconcilerError};
use crate::crd::{CertificateRequest, ClusterOriginIssuer, Issuer, IssuerKind, OriginIssuer};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Store operations the reconcilers depend on
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an issuer of the given kind
    async fn get_issuer(
        &self,
        kind: IssuerKind,
        key: &ObjectKey,
    ) -> Result<Option<Issuer>, ReconcilerError>;

    /// Replace an issuer's status
    async fn replace_issuer_status(&self, issuer: &Issuer) -> Result<(), ReconcilerError>;

    /// Fetch a certificate request
    async fn get_certificate_request(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<CertificateRequest>, ReconcilerError>;

    /// Replace a certificate request's status
    async fn replace_certificate_request_status(
        &self,
        request: &CertificateRequest,
    ) -> Result<(), ReconcilerError>;

    /// Fetch a secret
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ReconcilerError>;
}

/// Token bucket limiting calls to the API server
#[derive(Debug)]
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `qps` calls per second with bursts of `burst`
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Wait until a call is allowed
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
                bucket.refilled_at = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.qps)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    limiter: std::sync::Arc<RateLimiter>,
    timeout: Duration,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("limiter", &self.limiter)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Create a store with the given rate limiter and per-call deadline
    pub fn new(client: Client, limiter: RateLimiter, timeout: Duration) -> Self {
        Self {
            client,
            limiter: std::sync::Arc::new(limiter),
            timeout,
        }
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, ReconcilerError>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        self.limiter.acquire().await;
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ReconcilerError::from),
            Err(_elapsed) => Err(ReconcilerError::Timeout {
                operation: operation.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn patch_status<K>(
        &self,
        api: Api<K>,
        name: &str,
        resource_version: Option<&str>,
        status: &impl Serialize,
    ) -> Result<(), ReconcilerError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + Sync,
    {
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "status": serde_json::to_value(status)?,
        });

        let result = self
            .call(
                "patch_status",
                api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(ReconcilerError::Kube(kube::Error::Api(api_err))) if api_err.code == 404 => {
                debug!(
                    resource.name = name,
                    "Object was deleted during reconciliation, skipping status update"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_issuer(
        &self,
        kind: IssuerKind,
        key: &ObjectKey,
    ) -> Result<Option<Issuer>, ReconcilerError> {
        match kind {
            IssuerKind::Namespaced => {
                let api: Api<OriginIssuer> =
                    Api::namespaced(self.client.clone(), key.require_namespace()?);
                Ok(self
                    .call("get_origin_issuer", api.get_opt(&key.name))
                    .await?
                    .map(Issuer::Namespaced))
            }
            IssuerKind::Cluster => {
                let api: Api<ClusterOriginIssuer> = Api::all(self.client.clone());
                Ok(self
                    .call("get_cluster_origin_issuer", api.get_opt(&key.name))
                    .await?
                    .map(Issuer::Cluster))
            }
        }
    }

    async fn replace_issuer_status(&self, issuer: &Issuer) -> Result<(), ReconcilerError> {
        match issuer {
            Issuer::Namespaced(i) => {
                let key = ObjectKey::from_resource(i)
                    .ok_or_else(|| ReconcilerError::InvalidKey("issuer has no name".to_string()))?;
                let api: Api<OriginIssuer> =
                    Api::namespaced(self.client.clone(), key.require_namespace()?);
                self.patch_status(
                    api,
                    &key.name,
                    i.metadata.resource_version.as_deref(),
                    &i.status,
                )
                .await
            }
            Issuer::Cluster(i) => {
                let name = i.metadata.name.as_deref().ok_or_else(|| {
                    ReconcilerError::InvalidKey("cluster issuer has no name".to_string())
                })?;
                let api: Api<ClusterOriginIssuer> = Api::all(self.client.clone());
                self.patch_status(api, name, i.metadata.resource_version.as_deref(), &i.status)
                    .await
            }
        }
    }

    async fn get_certificate_request(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<CertificateRequest>, ReconcilerError> {
        let api: Api<CertificateRequest> =
            Api::namespaced(self.client.clone(), key.require_namespace()?);
        self.call("get_certificate_request", api.get_opt(&key.name))
            .await
    }

    async fn replace_certificate_request_status(
        &self,
        request: &CertificateRequest,
    ) -> Result<(), ReconcilerError> {
        let key = ObjectKey::from_resource(request).ok_or_else(|| {
            ReconcilerError::InvalidKey("certificate request has no name".to_string())
        })?;
        let api: Api<CertificateRequest> =
            Api::namespaced(self.client.clone(), key.require_namespace()?);
        self.patch_status(
            api,
            &key.name,
            request.metadata.resource_version.as_deref(),
            &request.status,
        )
        .await
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ReconcilerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        self.call("get_secret", api.get_opt(name)).await
    }
}
