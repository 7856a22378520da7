//! # API Responses
//!
//! Success and error bodies of the Origin CA API.

use serde::Deserialize;

/// Signed certificate returned by the CA
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedCertificate {
    /// Leaf certificate plus intermediates (PEM)
    pub certificate_chain: String,
    /// Issuing CA certificate (PEM)
    #[serde(default)]
    pub ca_certificate: String,
}

/// Success body, bare or wrapped in the `{ success, result }` envelope
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum SignResponseBody {
    Envelope { result: SignedCertificate },
    Bare(SignedCertificate),
}

impl SignResponseBody {
    pub(crate) fn into_certificate(self) -> SignedCertificate {
        match self {
            Self::Envelope { result } | Self::Bare(result) => result,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Human readable message for an error response body
///
/// Falls back to the raw body when it is not one of the known shapes.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok().and_then(|parsed| {
        let mut messages: Vec<String> = parsed
            .errors
            .iter()
            .filter(|e| !e.message.is_empty())
            .map(|e| match e.code {
                Some(code) => format!("{} (code {code})", e.message),
                None => e.message.clone(),
            })
            .collect();
        if messages.is_empty() {
            messages.extend(parsed.message);
        }
        (!messages.is_empty()).then(|| messages.join("; "))
    });

    parsed.unwrap_or_else(|| {
        let raw = body.trim();
        if raw.is_empty() {
            "empty response body".to_string()
        } else {
            raw.to_string()
        }
    })
}
