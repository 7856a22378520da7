//! # CertificateRequest Contract
//!
//! cert-manager owns the `CertificateRequest` schema. Only the fields this
//! controller reads or writes are modeled here; everything else round-trips
//! untouched because status is written through the status subresource.

use k8s_openapi::ByteString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::status::{Condition, ConditionStatus};

/// Condition type carrying the issuance outcome
pub const CONDITION_READY: &str = "Ready";
/// Condition type set by approvers when a request may be signed
pub const CONDITION_APPROVED: &str = "Approved";
/// Condition type set by approvers when a request must not be signed
pub const CONDITION_DENIED: &str = "Denied";
/// Condition type marking a request that can never be signed as submitted
pub const CONDITION_INVALID_REQUEST: &str = "InvalidRequest";

/// Referenced issuer does not exist (yet)
pub const REASON_ISSUER_NOT_FOUND: &str = "IssuerNotFound";
/// Referenced issuer exists but is not Ready
pub const REASON_ISSUER_NOT_READY: &str = "IssuerNotReady";
/// Certificate was signed and stored
pub const REASON_ISSUED: &str = "Issued";
/// Request was denied by an approver or by the CA
pub const REASON_DENIED: &str = "Denied";
/// Signing failed
pub const REASON_FAILED: &str = "Failed";

/// Annotation listing the requested DNS names (comma separated)
pub const ANNOTATION_ALT_NAMES: &str = "cert-manager.io/alt-names";
/// Annotation carrying the requested common name
pub const ANNOTATION_COMMON_NAME: &str = "cert-manager.io/common-name";

/// cert-manager CertificateRequest (consumed/produced fields only)
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize)]
#[kube(
    kind = "CertificateRequest",
    group = "cert-manager.io",
    version = "v1",
    namespaced,
    status = "CertificateRequestStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// PEM encoded certificate signing request
    #[serde(rename = "request")]
    pub csr: ByteString,
    /// Issuer expected to sign this request
    pub issuer_ref: IssuerReference,
    /// Requested lifetime as a Go duration string (e.g. "2160h0m0s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Whether a CA certificate is requested
    #[serde(default, rename = "isCA")]
    pub is_ca: bool,
}

/// Reference from a certificate request to its issuer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerReference {
    /// Issuer name
    pub name: String,
    /// Issuer kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Issuer API group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Status written by the issuing controller
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Signed certificate chain (PEM)
    #[serde(default)]
    pub certificate: Option<ByteString>,
    /// CA certificate (PEM)
    #[serde(default)]
    pub ca: Option<ByteString>,
    /// Time the request failed for good (RFC3339)
    #[serde(default)]
    pub failure_time: Option<String>,
}

/// Sink states of a certificate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// Certificate stored
    Issued,
    /// Denied by an approver or the CA
    Denied,
    /// Request can never be signed
    InvalidRequest,
    /// Retries exhausted
    Failed,
}

impl CertificateRequest {
    fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == condition_type))
    }

    fn has_true_condition(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// `Approved=True` has been set by an approver
    pub fn is_approved(&self) -> bool {
        self.has_true_condition(CONDITION_APPROVED)
    }

    /// `Denied=True` has been set by an approver
    pub fn is_denied(&self) -> bool {
        self.has_true_condition(CONDITION_DENIED)
    }

    /// Sink state reached by this request, if any
    pub fn terminal_state(&self) -> Option<TerminalState> {
        let status = self.status.as_ref()?;

        if status
            .certificate
            .as_ref()
            .is_some_and(|cert| !cert.0.is_empty())
        {
            return Some(TerminalState::Issued);
        }
        if self.has_true_condition(CONDITION_INVALID_REQUEST) {
            return Some(TerminalState::InvalidRequest);
        }

        let ready = self.condition(CONDITION_READY)?;
        match (ready.status, ready.reason.as_deref()) {
            (ConditionStatus::True, _) => Some(TerminalState::Issued),
            (ConditionStatus::False, Some(REASON_DENIED)) => Some(TerminalState::Denied),
            (ConditionStatus::False, Some(REASON_FAILED)) if status.failure_time.is_some() => {
                Some(TerminalState::Failed)
            }
            _ => None,
        }
    }

    /// Hostnames requested through cert-manager annotations
    ///
    /// Returns `None` when no annotation is present, in which case the CSR's
    /// own names are authoritative.
    pub fn requested_hostnames(&self) -> Option<Vec<String>> {
        let annotations = self.metadata.annotations.as_ref()?;
        let alt_names = annotations.get(ANNOTATION_ALT_NAMES);
        let common_name = annotations.get(ANNOTATION_COMMON_NAME);
        if alt_names.is_none() && common_name.is_none() {
            return None;
        }

        let mut hostnames: Vec<String> = alt_names
            .map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(cn) = common_name.map(|cn| cn.trim()).filter(|cn| !cn.is_empty()) {
            hostnames.push(cn.to_string());
        }
        Some(hostnames)
    }
}
