//! # Reconciler Types
//!
//! Shared context, object keys, outcomes and errors.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::clock::Clock;
use crate::controller::store::ResourceStore;
use crate::provider::SignerFactory;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Identity of an object: namespace (absent for cluster-scoped) and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of any Kubernetes object, `None` if it has no name
    pub fn from_resource<K: kube::Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone()?,
        })
    }

    /// Namespace, or an `InvalidKey` error for cluster-scoped keys
    pub fn require_namespace(&self) -> Result<&str, ReconcilerError> {
        self.namespace
            .as_deref()
            .ok_or_else(|| ReconcilerError::InvalidKey(format!("{self} has no namespace")))
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Result of one successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing further to do until the object changes
    Done,
    /// Reconcile again after the given delay
    RequeueAfter(Duration),
}

/// Error reconciling an object; the dispatcher requeues with backoff
#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    /// Kubernetes API call failed
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// Object changed between read and write
    #[error("Conflict writing {0}: object was modified, will refetch")]
    Conflict(String),

    /// Store call exceeded its deadline
    #[error("{operation} timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Store operation that timed out
        operation: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// Status could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object key does not fit the resource kind
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

impl From<kube::Error> for ReconcilerError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 409 => Self::Conflict(response.message),
            other => Self::Kube(other),
        }
    }
}

/// A reconciler driven by the dispatcher
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    /// Controller name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Bring the object with this key toward its desired state
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcilerError>;
}

/// Settings shared by the reconcilers
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Namespace holding credentials of cluster-scoped issuers
    pub cluster_resource_namespace: String,
    /// Sign requests without waiting for `Approved=True`
    pub disable_approved_check: bool,
    /// Transient CA failures tolerated before a request fails for good
    pub max_retries: u32,
    /// Backoff applied to transient failures and pending requests
    pub backoff: ExponentialBackoff,
    /// Re-validation period of a Ready issuer
    pub issuer_revalidate_interval: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            cluster_resource_namespace: DEFAULT_CLUSTER_RESOURCE_NAMESPACE.to_string(),
            disable_approved_check: false,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: ExponentialBackoff::new(
                Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
                Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            ),
            issuer_revalidate_interval: Duration::from_secs(DEFAULT_ISSUER_REVALIDATE_SECS),
        }
    }
}

/// Collaborators shared by every reconciler
#[derive(Clone)]
pub struct Context {
    /// Resource store
    pub store: Arc<dyn ResourceStore>,
    /// Builds CA clients per credential
    pub signers: Arc<dyn SignerFactory>,
    /// Time source for condition timestamps
    pub clock: Arc<dyn Clock>,
    /// Reconciler settings
    pub settings: ReconcilerSettings,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
