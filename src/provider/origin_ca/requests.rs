//! # Signing Requests
//!
//! A [`SignRequest`] can only be built from a CSR that passed local
//! validation, so the client never sends a request the CA would reject for
//! shape alone.

use super::csr::inspect_csr;
use super::error::CaError;
use super::hostnames::{canonical_set, is_valid_hostname};
use crate::crd::RequestType;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Validated signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    hostnames: Vec<String>,
    csr: String,
    request_type: RequestType,
    validity_days: u32,
    idempotency_key: Option<String>,
}

impl SignRequest {
    /// Validate a CSR against the requested hostnames
    ///
    /// When `requested_hostnames` is `None` the CSR's own names are used.
    /// Otherwise the canonical requested set must equal the canonical set of
    /// names in the CSR.
    pub fn new(
        csr_pem: &[u8],
        requested_hostnames: Option<&[String]>,
        request_type: RequestType,
        validity_days: u32,
    ) -> Result<Self, CaError> {
        let csr = std::str::from_utf8(csr_pem)
            .map_err(|e| CaError::validation(format!("CSR is not valid UTF-8: {e}")))?
            .to_string();
        let csr_names = canonical_set(inspect_csr(csr_pem)?.hostnames());
        if csr_names.is_empty() {
            return Err(CaError::validation("CSR does not request any DNS names"));
        }

        let hostnames = match requested_hostnames {
            Some(requested) => canonical_set(requested),
            None => csr_names.clone(),
        };
        if let Some(invalid) = hostnames.iter().find(|h| !is_valid_hostname(h)) {
            return Err(CaError::validation(format!("invalid hostname '{invalid}'")));
        }
        if hostnames != csr_names {
            let requested: Vec<&str> = hostnames.iter().map(String::as_str).collect();
            let in_csr: Vec<&str> = csr_names.iter().map(String::as_str).collect();
            return Err(CaError::validation(format!(
                "requested hostnames [{}] do not match CSR names [{}]",
                requested.join(", "),
                in_csr.join(", ")
            )));
        }

        Ok(Self {
            hostnames: hostnames.into_iter().collect(),
            csr,
            request_type,
            validity_days,
            idempotency_key: None,
        })
    }

    /// Attach a key the CA can use to deduplicate retries
    #[must_use]
    pub fn with_idempotency_key(mut self, key: String) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Canonical hostnames, sorted
    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    /// Requested validity (days)
    pub fn validity_days(&self) -> u32 {
        self.validity_days
    }

    /// Requested key type
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Idempotency key, if any
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub(crate) fn body(&self) -> CreateCertificateBody<'_> {
        CreateCertificateBody {
            hostnames: &self.hostnames,
            csr: &self.csr,
            request_type: self.request_type.as_str(),
            requested_validity_days: self.validity_days,
        }
    }
}

/// JSON body of `POST /certificates`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateCertificateBody<'a> {
    pub hostnames: &'a [String],
    pub csr: &'a str,
    pub request_type: &'static str,
    pub requested_validity_days: u32,
}

/// Deterministic key for one object's signing request
///
/// The same object UID and CSR always yield the same key, so a retry after a
/// lost response carries the key of the original attempt.
pub fn idempotency_key(uid: &str, csr_pem: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update([0u8]);
    hasher.update(csr_pem);
    format!("{:x}", hasher.finalize())
}
