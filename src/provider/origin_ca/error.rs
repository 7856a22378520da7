//! # CA Errors
//!
//! Classified failures returned by the Origin CA client. The kind alone
//! decides whether a caller may retry.

use std::time::Duration;

/// Failure classes of the Origin CA API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaErrorKind {
    /// Credential rejected (401/403)
    Authentication,
    /// Request rejected as malformed, or failed local validation
    Validation,
    /// Too many requests (429)
    RateLimit,
    /// CA failed to process the request (5xx or malformed success body)
    Server,
    /// Connection, timeout or transport failure
    Network,
}

impl CaErrorKind {
    /// Whether the same request may succeed later
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimit | Self::Server | Self::Network)
    }

    /// Stable label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for CaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the Origin CA client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Origin CA {kind} error: {message}")]
pub struct CaError {
    /// Failure class
    pub kind: CaErrorKind,
    /// Human readable detail, safe to surface in conditions
    pub message: String,
    /// Server supplied hint for when to retry
    pub retry_after: Option<Duration>,
}

impl CaError {
    fn new(kind: CaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Credential rejected
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(CaErrorKind::Authentication, message)
    }

    /// Request can never succeed as submitted
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(CaErrorKind::Validation, message)
    }

    /// Rate limited, optionally with a retry hint
    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(CaErrorKind::RateLimit, message)
        }
    }

    /// CA side failure
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(CaErrorKind::Server, message)
    }

    /// Transport failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CaErrorKind::Network, message)
    }

    /// Whether the same request may succeed later
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: reqwest::StatusCode, message: String, retry_after: Option<Duration>) -> Self {
        match status.as_u16() {
            401 | 403 => Self::authentication(message),
            429 => Self::rate_limit(message, retry_after),
            500..=599 => Self::server(message),
            400..=499 => Self::validation(message),
            _ => Self::server(format!("unexpected status {status}: {message}")),
        }
    }
}

impl From<reqwest::Error> for CaError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::network(format!("request timed out: {error}"))
        } else if error.is_decode() {
            Self::server(format!("malformed response body: {error}"))
        } else {
            Self::network(error.to_string())
        }
    }
}
