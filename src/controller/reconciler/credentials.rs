//! # Credentials
//!
//! Resolves an issuer's service key from its Secret. The key is read fresh on
//! every reconciliation and only lives as long as the client built from it.

use crate::controller::reconciler::types::{ReconcilerError, ReconcilerSettings};
use crate::controller::store::ResourceStore;
use crate::crd::{Issuer, IssuerKind, SecretKeySelector};
use crate::provider::origin_ca::ServiceKey;

/// Reasons a service key could not be resolved
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Secret does not exist
    #[error("Secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },

    /// Secret exists but lacks the key
    #[error("Key '{key}' not found in secret {namespace}/{name}")]
    KeyNotFound {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Missing key
        key: String,
    },

    /// Key value cannot be a service key
    #[error("Service key in secret {namespace}/{name} is malformed: {reason}")]
    Malformed {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// What is wrong with the value
        reason: String,
    },

    /// Store call failed; retried by the dispatcher
    #[error(transparent)]
    Store(#[from] ReconcilerError),
}

impl CredentialError {
    /// Secret or key is absent
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::SecretNotFound { .. } | Self::KeyNotFound { .. })
    }
}

/// Namespace the issuer's secret is read from
///
/// Namespaced issuers use their own namespace; cluster issuers use the
/// configured cluster resource namespace.
pub fn credential_namespace(
    issuer: &Issuer,
    settings: &ReconcilerSettings,
) -> Result<String, ReconcilerError> {
    match issuer.kind() {
        IssuerKind::Namespaced => issuer.metadata().namespace.clone().ok_or_else(|| {
            ReconcilerError::InvalidKey(format!(
                "{} {} has no namespace",
                issuer.kind(),
                issuer.metadata().name.as_deref().unwrap_or("unknown")
            ))
        }),
        IssuerKind::Cluster => Ok(settings.cluster_resource_namespace.clone()),
    }
}

/// Check and wrap a raw secret value
///
/// Surrounding whitespace (a trailing newline from `--from-file`) is dropped;
/// anything else that is not a printable, non-blank ASCII token is rejected.
pub fn parse_service_key(raw: &[u8]) -> Result<ServiceKey, String> {
    let value = std::str::from_utf8(raw).map_err(|e| format!("not valid UTF-8: {e}"))?;
    let value = value.trim();
    if value.is_empty() {
        return Err("value is empty".to_string());
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("value contains whitespace or control characters".to_string());
    }
    Ok(ServiceKey::new(value.to_string()))
}

/// Read the service key an issuer points at
pub async fn resolve_service_key(
    store: &dyn ResourceStore,
    namespace: &str,
    selector: &SecretKeySelector,
) -> Result<ServiceKey, CredentialError> {
    let secret = store
        .get_secret(namespace, &selector.name)
        .await?
        .ok_or_else(|| CredentialError::SecretNotFound {
            namespace: namespace.to_string(),
            name: selector.name.clone(),
        })?;

    let raw = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&selector.key))
        .ok_or_else(|| CredentialError::KeyNotFound {
            namespace: namespace.to_string(),
            name: selector.name.clone(),
            key: selector.key.clone(),
        })?;

    parse_service_key(&raw.0).map_err(|reason| CredentialError::Malformed {
        namespace: namespace.to_string(),
        name: selector.name.clone(),
        reason,
    })
}
