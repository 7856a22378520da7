//! # Status Transitions
//!
//! Pure functions computing the next status of an object. The reconcilers
//! apply them to an owned copy and write the copy back only when it differs
//! from what was read.

use crate::controller::conditions::{format_timestamp, set_condition};
use crate::controller::reconciler::types::Outcome;
use crate::crd::{
    CertificateRequestStatus, ConditionStatus, CONDITION_INVALID_REQUEST, CONDITION_READY,
    REASON_DENIED, REASON_FAILED, REASON_ISSUED,
};
use crate::provider::origin_ca::SignedCertificate;
use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;

/// Ready condition to publish and what to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    /// Ready status
    pub status: ConditionStatus,
    /// Machine readable reason
    pub reason: &'static str,
    /// Human readable message
    pub message: String,
    /// Scheduling decision
    pub outcome: Outcome,
}

impl ConditionUpdate {
    /// Update that needs no requeue
    pub fn done(status: ConditionStatus, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: message.into(),
            outcome: Outcome::Done,
        }
    }
}

/// Waiting on the issuer
pub fn set_pending(
    status: &mut CertificateRequestStatus,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        ConditionStatus::False,
        reason,
        message,
        now,
    );
}

/// Certificate stored; terminal
pub fn set_issued(
    status: &mut CertificateRequestStatus,
    certificate: &SignedCertificate,
    now: DateTime<Utc>,
) {
    status.certificate = Some(ByteString(certificate.certificate_chain.clone().into_bytes()));
    status.ca = Some(ByteString(certificate.ca_certificate.clone().into_bytes()));
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        ConditionStatus::True,
        REASON_ISSUED,
        "Certificate issued",
        now,
    );
}

/// Denied by an approver or the CA; terminal
pub fn set_denied(status: &mut CertificateRequestStatus, message: impl Into<String>, now: DateTime<Utc>) {
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        ConditionStatus::False,
        REASON_DENIED,
        message,
        now,
    );
    mark_failure_time(status, now);
}

/// Request can never be signed; terminal
pub fn set_invalid(status: &mut CertificateRequestStatus, message: impl Into<String>, now: DateTime<Utc>) {
    let message = message.into();
    set_condition(
        &mut status.conditions,
        CONDITION_INVALID_REQUEST,
        ConditionStatus::True,
        REASON_FAILED,
        message.clone(),
        now,
    );
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        ConditionStatus::False,
        REASON_FAILED,
        message,
        now,
    );
    mark_failure_time(status, now);
}

/// Signing failed; terminal only once retries are exhausted
pub fn set_failed(
    status: &mut CertificateRequestStatus,
    message: impl Into<String>,
    terminal: bool,
    now: DateTime<Utc>,
) {
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        ConditionStatus::False,
        REASON_FAILED,
        message,
        now,
    );
    if terminal {
        mark_failure_time(status, now);
    }
}

fn mark_failure_time(status: &mut CertificateRequestStatus, now: DateTime<Utc>) {
    if status.failure_time.is_none() {
        status.failure_time = Some(format_timestamp(now));
    }
}
