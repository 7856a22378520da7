//! # Issuer Resources
//!
//! `OriginIssuer` (namespaced) and `ClusterOriginIssuer` (cluster-scoped) name
//! the Origin CA service key used to sign certificate requests.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::Condition;

/// OriginIssuer Custom Resource Definition
///
/// A namespaced issuer. Certificate requests may only reference it from the
/// namespace it lives in, and its service key secret is read from that
/// namespace too.
///
/// # Example
///
/// ```yaml
/// apiVersion: cert-manager.k8s.cloudflare.com/v1
/// kind: OriginIssuer
/// metadata:
///   name: prod-issuer
///   namespace: default
/// spec:
///   requestType: OriginECC
///   auth:
///     serviceKeyRef:
///       name: service-key
///       key: key
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "OriginIssuer",
    group = "cert-manager.k8s.cloudflare.com",
    version = "v1",
    namespaced,
    status = "OriginIssuerStatus",
    shortname = "oi",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OriginIssuerSpec {
    /// Key type of the certificates this issuer requests
    pub request_type: RequestType,
    /// Credential used to authenticate with the Origin CA API
    pub auth: OriginIssuerAuthentication,
}

/// ClusterOriginIssuer Custom Resource Definition
///
/// Same shape as [`OriginIssuer`] but cluster-scoped. Its service key secret is
/// read from the configured cluster resource namespace.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ClusterOriginIssuer",
    group = "cert-manager.k8s.cloudflare.com",
    version = "v1",
    status = "OriginIssuerStatus",
    shortname = "coi",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOriginIssuerSpec {
    /// Key type of the certificates this issuer requests
    pub request_type: RequestType,
    /// Credential used to authenticate with the Origin CA API
    pub auth: OriginIssuerAuthentication,
}

/// Certificate key type requested from the Origin CA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RequestType {
    /// RSA key
    #[serde(rename = "OriginRSA")]
    OriginRsa,
    /// ECDSA key
    #[serde(rename = "OriginECC")]
    OriginEcc,
}

impl RequestType {
    /// Wire value sent to the Origin CA API
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::OriginRsa => "origin-rsa",
            RequestType::OriginEcc => "origin-ecc",
        }
    }
}

/// Authentication settings for an issuer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OriginIssuerAuthentication {
    /// Secret holding the Origin CA service key
    pub service_key_ref: SecretKeySelector,
}

/// Reference to a single key of a Secret
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    /// Name of the secret
    pub name: String,
    /// Key within the secret's data
    pub key: String,
}

/// Status of an issuer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OriginIssuerStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Common view over both issuer kinds
pub trait IssuerObject: kube::Resource + Clone + Send + Sync {
    /// Key type requested by this issuer
    fn request_type(&self) -> RequestType;
    /// Secret reference holding the service key
    fn service_key_ref(&self) -> &SecretKeySelector;
    /// Current status, if any has been written
    fn issuer_status(&self) -> Option<&OriginIssuerStatus>;
    /// Mutable status, created empty when missing
    fn issuer_status_mut(&mut self) -> &mut OriginIssuerStatus;
}

impl IssuerObject for OriginIssuer {
    fn request_type(&self) -> RequestType {
        self.spec.request_type
    }

    fn service_key_ref(&self) -> &SecretKeySelector {
        &self.spec.auth.service_key_ref
    }

    fn issuer_status(&self) -> Option<&OriginIssuerStatus> {
        self.status.as_ref()
    }

    fn issuer_status_mut(&mut self) -> &mut OriginIssuerStatus {
        self.status.get_or_insert_with(OriginIssuerStatus::default)
    }
}

impl IssuerObject for ClusterOriginIssuer {
    fn request_type(&self) -> RequestType {
        self.spec.request_type
    }

    fn service_key_ref(&self) -> &SecretKeySelector {
        &self.spec.auth.service_key_ref
    }

    fn issuer_status(&self) -> Option<&OriginIssuerStatus> {
        self.status.as_ref()
    }

    fn issuer_status_mut(&mut self) -> &mut OriginIssuerStatus {
        self.status.get_or_insert_with(OriginIssuerStatus::default)
    }
}

/// Scope of an issuer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuerKind {
    /// `OriginIssuer`, only usable from its own namespace
    Namespaced,
    /// `ClusterOriginIssuer`, usable from every namespace
    Cluster,
}

impl IssuerKind {
    /// Kubernetes kind name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Namespaced => crate::constants::ORIGIN_ISSUER_KIND,
            Self::Cluster => crate::constants::CLUSTER_ORIGIN_ISSUER_KIND,
        }
    }

    /// Kind referenced by a certificate request; an empty kind means `OriginIssuer`
    pub fn from_reference(kind: Option<&str>) -> Option<Self> {
        match kind {
            None | Some("") => Some(Self::Namespaced),
            Some(k) if k == crate::constants::ORIGIN_ISSUER_KIND => Some(Self::Namespaced),
            Some(k) if k == crate::constants::CLUSTER_ORIGIN_ISSUER_KIND => Some(Self::Cluster),
            Some(_) => None,
        }
    }
}

impl std::fmt::Display for IssuerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either issuer kind, as read from the store
#[derive(Debug, Clone, PartialEq)]
pub enum Issuer {
    /// Namespaced issuer
    Namespaced(OriginIssuer),
    /// Cluster-scoped issuer
    Cluster(ClusterOriginIssuer),
}

impl Issuer {
    /// Scope of this issuer
    pub fn kind(&self) -> IssuerKind {
        match self {
            Self::Namespaced(_) => IssuerKind::Namespaced,
            Self::Cluster(_) => IssuerKind::Cluster,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &kube::core::ObjectMeta {
        match self {
            Self::Namespaced(i) => &i.metadata,
            Self::Cluster(i) => &i.metadata,
        }
    }

    /// Key type requested by this issuer
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Namespaced(i) => i.request_type(),
            Self::Cluster(i) => i.request_type(),
        }
    }

    /// Secret reference holding the service key
    pub fn service_key_ref(&self) -> &SecretKeySelector {
        match self {
            Self::Namespaced(i) => i.service_key_ref(),
            Self::Cluster(i) => i.service_key_ref(),
        }
    }

    /// Current conditions (empty when no status was written yet)
    pub fn conditions(&self) -> &[Condition] {
        let status = match self {
            Self::Namespaced(i) => i.issuer_status(),
            Self::Cluster(i) => i.issuer_status(),
        };
        status.map_or(&[][..], |s| s.conditions.as_slice())
    }

    /// Mutable status, created empty when missing
    pub fn status_mut(&mut self) -> &mut OriginIssuerStatus {
        match self {
            Self::Namespaced(i) => i.issuer_status_mut(),
            Self::Cluster(i) => i.issuer_status_mut(),
        }
    }
}
