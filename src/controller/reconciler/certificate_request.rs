//! # Certificate Request Reconciler
//!
//! Drives a cert-manager `CertificateRequest` that references one of our
//! issuers to a terminal outcome.
//!
//! ```text
//! New -> Pending (approval | issuer) -> Signing -> Issued
//!                                              -> Denied
//!                                              -> InvalidRequest
//!                                              -> Failed (retryable) -> ... -> Failed (terminal)
//! ```
//!
//! Checks run in this order:
//!
//! 1. issuer group/kind belongs to this controller
//! 2. terminal requests are left alone, and a request waiting out a retry
//!    delay is requeued for the remainder
//! 3. `Denied=True` from an approver
//! 4. approval gate (`Approved=True` required unless disabled)
//! 5. `isCA` rejection
//! 6. issuer resolution, scoped to the request namespace for `OriginIssuer`
//! 7. credential resolution
//! 8. local CSR validation
//! 9. CA call

use crate::constants::ISSUER_GROUP;
use crate::controller::backoff::{BackoffTracker, RetryGate};
use crate::controller::conditions::condition_status;
use crate::controller::reconciler::credentials::{
    credential_namespace, resolve_service_key, CredentialError,
};
use crate::controller::reconciler::status::{
    set_denied, set_failed, set_invalid, set_issued, set_pending,
};
use crate::controller::reconciler::types::{
    Context, ObjectKey, Outcome, Reconcile, ReconcilerError,
};
use crate::crd::{
    CertificateRequest, ConditionStatus, IssuerKind, IssuerReference, CONDITION_READY,
    REASON_ISSUER_NOT_FOUND, REASON_ISSUER_NOT_READY,
};
use crate::observability;
use crate::provider::origin_ca::{
    idempotency_key, validity, CaErrorKind, SignRequest, SignedCertificate,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Next step for a request, decided before any status is written
#[derive(Debug)]
enum Step {
    /// Leave the object untouched
    Skip,
    /// Waiting on the issuer
    Pending {
        reason: &'static str,
        message: String,
    },
    /// Denied by an approver or the CA
    Denied { message: String },
    /// Request can never be signed
    Invalid { message: String },
    /// CA failed transiently
    Failed {
        message: String,
        retry_after: Option<Duration>,
    },
    /// CA signed the request
    Issued(SignedCertificate),
}

/// Reconciler for cert-manager `CertificateRequest`s
#[derive(Debug)]
pub struct CertificateRequestReconciler {
    ctx: Arc<Context>,
    failures: BackoffTracker<ObjectKey>,
    pending: BackoffTracker<ObjectKey>,
    retry_gate: RetryGate<ObjectKey>,
}

impl CertificateRequestReconciler {
    /// Create a reconciler
    pub fn new(ctx: Arc<Context>) -> Self {
        let failures = BackoffTracker::new(ctx.settings.backoff);
        let pending = BackoffTracker::new(ctx.settings.backoff);
        Self {
            ctx,
            failures,
            pending,
            retry_gate: RetryGate::new(),
        }
    }

    fn forget(&self, key: &ObjectKey) {
        self.failures.reset(key);
        self.pending.reset(key);
        self.retry_gate.clear(key);
    }

    /// Decide what to do with a non-terminal request
    async fn evaluate(
        &self,
        key: &ObjectKey,
        request: &CertificateRequest,
        kind: IssuerKind,
    ) -> Result<Step, ReconcilerError> {
        if request.is_denied() {
            return Ok(Step::Denied {
                message: "The CertificateRequest was denied by an approval controller".to_string(),
            });
        }

        if !self.ctx.settings.disable_approved_check && !request.is_approved() {
            debug!(resource.key = %key, "Waiting for the request to be approved");
            return Ok(Step::Skip);
        }

        if request.spec.is_ca {
            return Ok(Step::Invalid {
                message: "Origin CA does not issue CA certificates".to_string(),
            });
        }

        let issuer_name = &request.spec.issuer_ref.name;
        let issuer_key = match kind {
            IssuerKind::Namespaced => ObjectKey::namespaced(key.require_namespace()?, issuer_name),
            IssuerKind::Cluster => ObjectKey::cluster(issuer_name),
        };

        let Some(issuer) = self.ctx.store.get_issuer(kind, &issuer_key).await? else {
            return Ok(Step::Pending {
                reason: REASON_ISSUER_NOT_FOUND,
                message: format!("{kind} {issuer_key} not found"),
            });
        };

        if condition_status(issuer.conditions(), CONDITION_READY) != ConditionStatus::True {
            return Ok(Step::Pending {
                reason: REASON_ISSUER_NOT_READY,
                message: format!("{kind} {issuer_key} is not Ready"),
            });
        }

        let namespace = credential_namespace(&issuer, &self.ctx.settings)?;
        let service_key =
            match resolve_service_key(self.ctx.store.as_ref(), &namespace, issuer.service_key_ref())
                .await
            {
                Ok(service_key) => service_key,
                Err(CredentialError::Store(e)) => return Err(e),
                Err(e) => {
                    return Ok(Step::Pending {
                        reason: REASON_ISSUER_NOT_READY,
                        message: format!("{kind} {issuer_key} credential unavailable: {e}"),
                    });
                }
            };

        let signer = match self.ctx.signers.signer(service_key) {
            Ok(signer) => signer,
            Err(e) => {
                return Ok(Step::Pending {
                    reason: REASON_ISSUER_NOT_READY,
                    message: format!("{kind} {issuer_key} credential unusable: {}", e.message),
                });
            }
        };
        self.pending.reset(key);

        let validity_days = match validity::validity_days(request.spec.duration.as_deref()) {
            Ok(days) => days,
            Err(e) => return Ok(Step::Invalid { message: e.message }),
        };
        let requested_hostnames = request.requested_hostnames();
        let sign_request = match SignRequest::new(
            &request.spec.csr.0,
            requested_hostnames.as_deref(),
            issuer.request_type(),
            validity_days,
        ) {
            Ok(sign_request) => sign_request,
            Err(e) => return Ok(Step::Invalid { message: e.message }),
        };
        let sign_request = match request.metadata.uid.as_deref() {
            Some(uid) => {
                sign_request.with_idempotency_key(idempotency_key(uid, &request.spec.csr.0))
            }
            None => sign_request,
        };

        info!(
            resource.key = %key,
            issuer = %issuer_key,
            hostnames = ?sign_request.hostnames(),
            validity_days,
            "Signing certificate request"
        );

        match signer.sign(&sign_request).await {
            Ok(certificate) => Ok(Step::Issued(certificate)),
            Err(e) if e.is_transient() => Ok(Step::Failed {
                message: e.to_string(),
                retry_after: e.retry_after,
            }),
            Err(e) if e.kind == CaErrorKind::Authentication => Ok(Step::Denied {
                message: e.to_string(),
            }),
            Err(e) => Ok(Step::Invalid {
                message: e.to_string(),
            }),
        }
    }
}

/// Whether the request names an issuer of this controller
fn owned_issuer_kind(issuer_ref: &IssuerReference) -> Option<IssuerKind> {
    if issuer_ref.group.as_deref() != Some(ISSUER_GROUP) {
        return None;
    }
    IssuerKind::from_reference(issuer_ref.kind.as_deref())
}

#[async_trait]
impl Reconcile for CertificateRequestReconciler {
    fn name(&self) -> &'static str {
        "certificaterequest"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcilerError> {
        let Some(request) = self.ctx.store.get_certificate_request(key).await? else {
            debug!(resource.key = %key, "CertificateRequest no longer exists");
            self.forget(key);
            return Ok(Outcome::Done);
        };

        let Some(kind) = owned_issuer_kind(&request.spec.issuer_ref) else {
            debug!(resource.key = %key, "CertificateRequest references a foreign issuer, ignoring");
            return Ok(Outcome::Done);
        };

        if let Some(state) = request.terminal_state() {
            debug!(resource.key = %key, state = ?state, "CertificateRequest is terminal");
            self.forget(key);
            return Ok(Outcome::Done);
        }

        if let Some(remaining) = self.retry_gate.remaining(key) {
            debug!(resource.key = %key, retry_in_secs = remaining.as_secs(), "Retry not due yet");
            return Ok(Outcome::RequeueAfter(remaining));
        }

        let step = self.evaluate(key, &request, kind).await?;
        let now = self.ctx.clock.now();
        let mut status = request.status.clone().unwrap_or_default();

        let outcome = match step {
            Step::Skip => return Ok(Outcome::Done),
            Step::Pending { reason, message } => {
                let (_, delay) = self.pending.record_failure(key);
                info!(resource.key = %key, reason, retry_in_secs = delay.as_secs(), "{message}");
                set_pending(&mut status, reason, message, now);
                observability::metrics::increment_requeues_total(reason);
                Outcome::RequeueAfter(delay)
            }
            Step::Denied { message } => {
                warn!(resource.key = %key, reason = "Denied", "{message}");
                self.forget(key);
                set_denied(&mut status, message, now);
                Outcome::Done
            }
            Step::Invalid { message } => {
                warn!(resource.key = %key, reason = "InvalidRequest", "{message}");
                self.forget(key);
                set_invalid(&mut status, message, now);
                Outcome::Done
            }
            Step::Failed {
                message,
                retry_after,
            } => {
                let (attempt, delay) = self.failures.record_failure(key);
                let max_retries = self.ctx.settings.max_retries;
                if attempt > max_retries {
                    warn!(resource.key = %key, attempt, "Retries exhausted: {message}");
                    self.forget(key);
                    set_failed(
                        &mut status,
                        format!("Failed after {max_retries} retries: {message}"),
                        true,
                        now,
                    );
                    Outcome::Done
                } else {
                    let delay = retry_after.map_or(delay, |hint| delay.max(hint));
                    self.retry_gate.defer(key, delay);
                    warn!(
                        resource.key = %key,
                        attempt,
                        retry_in_secs = delay.as_secs(),
                        "Signing failed, will retry: {message}"
                    );
                    set_failed(
                        &mut status,
                        format!("{message} (attempt {attempt} of {})", max_retries + 1),
                        false,
                        now,
                    );
                    observability::metrics::increment_requeues_total("ca-transient");
                    Outcome::RequeueAfter(delay)
                }
            }
            Step::Issued(certificate) => {
                info!(resource.key = %key, "Certificate issued");
                self.forget(key);
                set_issued(&mut status, &certificate, now);
                observability::metrics::increment_certificates_issued();
                Outcome::Done
            }
        };

        if request.status.as_ref() == Some(&status) {
            debug!(resource.key = %key, "Skipping status update - status unchanged");
        } else {
            let mut updated = request.clone();
            updated.status = Some(status);
            self.ctx
                .store
                .replace_certificate_request_status(&updated)
                .await?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::clock::FixedClock;
    use crate::controller::conditions::find_condition;
    use crate::controller::reconciler::types::ReconcilerSettings;
    use crate::controller::testing::{csr_pem, FakeSignerFactory, FakeStore};
    use crate::crd::{
        CertificateRequestSpec, CertificateRequestStatus, ClusterOriginIssuer,
        ClusterOriginIssuerSpec, Condition, Issuer, IssuerObject, OriginIssuer,
        OriginIssuerAuthentication,
        OriginIssuerSpec, RequestType, SecretKeySelector, TerminalState, ANNOTATION_ALT_NAMES,
        CONDITION_APPROVED, CONDITION_DENIED, CONDITION_INVALID_REQUEST, REASON_DENIED,
        REASON_FAILED, REASON_ISSUED,
    };
    use crate::provider::origin_ca::CaError;
    use chrono::TimeZone;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    struct Harness {
        store: Arc<FakeStore>,
        signers: Arc<FakeSignerFactory>,
        reconciler: CertificateRequestReconciler,
    }

    fn harness_with(settings: ReconcilerSettings) -> Harness {
        let store = Arc::new(FakeStore::default());
        let signers = Arc::new(FakeSignerFactory::default());
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        ));
        let ctx = Arc::new(Context {
            store: store.clone(),
            signers: signers.clone(),
            clock,
            settings,
        });
        Harness {
            store,
            signers,
            reconciler: CertificateRequestReconciler::new(ctx),
        }
    }

    fn harness() -> Harness {
        harness_with(ReconcilerSettings::default())
    }

    fn condition(condition_type: &str, status: ConditionStatus) -> Condition {
        Condition {
            r#type: condition_type.to_string(),
            status,
            last_transition_time: Some("2026-10-19T11:00:00Z".to_string()),
            reason: Some("test".to_string()),
            message: Some("test".to_string()),
            observed_generation: None,
        }
    }

    fn auth() -> OriginIssuerAuthentication {
        OriginIssuerAuthentication {
            service_key_ref: SecretKeySelector {
                name: "service-key".to_string(),
                key: "key".to_string(),
            },
        }
    }

    fn ready_issuer(namespace: &str, ready: ConditionStatus) -> Issuer {
        let mut issuer = OriginIssuer::new(
            "issuer",
            OriginIssuerSpec {
                request_type: RequestType::OriginEcc,
                auth: auth(),
            },
        );
        issuer.metadata.namespace = Some(namespace.to_string());
        issuer.issuer_status_mut().conditions = vec![condition(CONDITION_READY, ready)];
        Issuer::Namespaced(issuer)
    }

    fn ready_cluster_issuer() -> Issuer {
        let mut issuer = ClusterOriginIssuer::new(
            "cluster-issuer",
            ClusterOriginIssuerSpec {
                request_type: RequestType::OriginRsa,
                auth: auth(),
            },
        );
        issuer.issuer_status_mut().conditions =
            vec![condition(CONDITION_READY, ConditionStatus::True)];
        Issuer::Cluster(issuer)
    }

    fn request(namespace: &str, kind: &str, issuer: &str, names: &[&str]) -> CertificateRequest {
        let mut request = CertificateRequest::new(
            "req",
            CertificateRequestSpec {
                csr: ByteString(csr_pem(names).into_bytes()),
                issuer_ref: IssuerReference {
                    name: issuer.to_string(),
                    kind: Some(kind.to_string()),
                    group: Some(ISSUER_GROUP.to_string()),
                },
                duration: Some("2160h0m0s".to_string()),
                is_ca: false,
            },
        );
        request.metadata.namespace = Some(namespace.to_string());
        request.metadata.uid = Some("uid-1".to_string());
        request.status = Some(CertificateRequestStatus {
            conditions: vec![condition(CONDITION_APPROVED, ConditionStatus::True)],
            ..Default::default()
        });
        request
    }

    fn setup_ready(h: &Harness) -> ObjectKey {
        h.store.insert_issuer(ready_issuer("default", ConditionStatus::True));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        h.store
            .insert_request(request("default", "OriginIssuer", "issuer", &["example.com"]));
        ObjectKey::namespaced("default", "req")
    }

    fn ready_reason(h: &Harness, key: &ObjectKey) -> (ConditionStatus, String) {
        let request = h.store.request(key).unwrap();
        let status = request.status.unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        (ready.status, ready.reason.clone().unwrap())
    }

    #[tokio::test]
    async fn test_valid_request_is_issued_in_one_pass() {
        let h = harness();
        let key = setup_ready(&h);

        let outcome = h.reconciler.reconcile(&key).await.unwrap();

        assert_eq!(outcome, Outcome::Done);
        let stored = h.store.request(&key).unwrap();
        let status = stored.status.clone().unwrap();
        assert!(status.certificate.is_some());
        assert!(status.ca.is_some());
        assert_eq!(
            ready_reason(&h, &key),
            (ConditionStatus::True, REASON_ISSUED.to_string())
        );
        assert_eq!(stored.terminal_state(), Some(TerminalState::Issued));
        assert_eq!(h.signers.signer.sign_calls(), 1);
        assert_eq!(h.store.writes(), 1);

        let sent = h.signers.signer.last_request().unwrap();
        assert_eq!(sent.hostnames(), ["example.com".to_string()]);
        assert_eq!(sent.validity_days(), 90);
        assert_eq!(sent.request_type(), RequestType::OriginEcc);
        assert_eq!(
            sent.idempotency_key(),
            Some(idempotency_key("uid-1", &stored.spec.csr.0).as_str())
        );
    }

    #[tokio::test]
    async fn test_terminal_request_is_never_touched_again() {
        let h = harness();
        let key = setup_ready(&h);
        h.reconciler.reconcile(&key).await.unwrap();
        let issued = h.store.request(&key).unwrap();

        for _ in 0..3 {
            assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        }

        assert_eq!(h.signers.signer.sign_calls(), 1);
        assert_eq!(h.store.writes(), 1);
        assert_eq!(h.store.request(&key).unwrap(), issued);
    }

    #[tokio::test]
    async fn test_hostname_not_in_request_is_invalid() {
        let h = harness();
        h.store.insert_issuer(ready_issuer("default", ConditionStatus::True));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        let mut req = request("default", "OriginIssuer", "issuer", &["example.com", "evil.com"]);
        req.metadata.annotations = Some(BTreeMap::from([(
            ANNOTATION_ALT_NAMES.to_string(),
            "example.com".to_string(),
        )]));
        h.store.insert_request(req);
        let key = ObjectKey::namespaced("default", "req");

        let outcome = h.reconciler.reconcile(&key).await.unwrap();

        assert_eq!(outcome, Outcome::Done);
        let status = h.store.request(&key).unwrap().status.unwrap();
        assert!(status.certificate.is_none());
        assert_eq!(
            find_condition(&status.conditions, CONDITION_INVALID_REQUEST).map(|c| c.status),
            Some(ConditionStatus::True)
        );
        assert!(status.failure_time.is_some());
        assert_eq!(h.signers.signer.sign_calls(), 0);

        // terminal: nothing happens on later passes
        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(h.store.writes(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_hint_is_honored() {
        let h = harness();
        let key = setup_ready(&h);
        h.signers.signer.push_sign(Err(CaError::rate_limit(
            "too many requests",
            Some(Duration::from_secs(30)),
        )));

        let outcome = h.reconciler.reconcile(&key).await.unwrap();

        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(30)));
        assert_eq!(
            ready_reason(&h, &key),
            (ConditionStatus::False, REASON_FAILED.to_string())
        );
        let stored = h.store.request(&key).unwrap();
        assert_eq!(stored.status.unwrap().failure_time, None);
        assert_eq!(
            h.store.request(&key).unwrap().terminal_state(),
            None,
            "retryable failure must not be terminal"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_fail_for_good() {
        let h = harness();
        let key = setup_ready(&h);
        for _ in 0..6 {
            h.signers.signer.push_sign(Err(CaError::server("503")));
        }

        let mut delays = Vec::new();
        for _ in 0..5 {
            let delay = match h.reconciler.reconcile(&key).await.unwrap() {
                Outcome::RequeueAfter(delay) => delay,
                Outcome::Done => panic!("retryable failure should requeue"),
            };
            delays.push(delay.as_secs());

            // our own status write comes back as an event before the retry is due
            let calls = h.signers.signer.sign_calls();
            let writes = h.store.writes();
            assert_eq!(
                h.reconciler.reconcile(&key).await.unwrap(),
                Outcome::RequeueAfter(delay)
            );
            assert_eq!(h.signers.signer.sign_calls(), calls);
            assert_eq!(h.store.writes(), writes);

            tokio::time::advance(delay).await;
        }
        assert_eq!(delays, vec![5, 10, 20, 40, 80]);

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        let stored = h.store.request(&key).unwrap();
        assert_eq!(stored.terminal_state(), Some(TerminalState::Failed));
        assert_eq!(h.signers.signer.sign_calls(), 6);

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(h.signers.signer.sign_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_before_rate_limit_hint_do_not_reach_ca() {
        let h = harness();
        let key = setup_ready(&h);
        for _ in 0..7 {
            h.signers.signer.push_sign(Err(CaError::rate_limit(
                "too many requests",
                Some(Duration::from_secs(30)),
            )));
        }

        let mut outcomes = Vec::new();
        for _ in 0..7 {
            outcomes.push(h.reconciler.reconcile(&key).await.unwrap());
        }

        assert!(outcomes
            .iter()
            .all(|outcome| *outcome == Outcome::RequeueAfter(Duration::from_secs(30))));
        assert_eq!(h.signers.signer.sign_calls(), 1);
        assert_eq!(h.store.writes(), 1);
        assert_eq!(h.store.request(&key).unwrap().terminal_state(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_runs_once_hint_has_elapsed() {
        let h = harness();
        let key = setup_ready(&h);
        h.signers.signer.push_sign(Err(CaError::rate_limit(
            "too many requests",
            Some(Duration::from_secs(30)),
        )));

        assert_eq!(
            h.reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(30))
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            h.reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(20))
        );
        assert_eq!(h.signers.signer.sign_calls(), 1);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(h.signers.signer.sign_calls(), 2);
        assert_eq!(ready_reason(&h, &key).1, REASON_ISSUED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure_resets_backoff() {
        let h = harness();
        let key = setup_ready(&h);
        h.signers.signer.push_sign(Err(CaError::network("timeout")));

        assert_eq!(
            h.reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(5))
        );
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(h.reconciler.failures.attempts(&key), 0);
        assert_eq!(h.reconciler.retry_gate.remaining(&key), None);
        assert_eq!(ready_reason(&h, &key).1, REASON_ISSUED);
    }

    #[tokio::test]
    async fn test_authentication_failure_denies() {
        let h = harness();
        let key = setup_ready(&h);
        h.signers
            .signer
            .push_sign(Err(CaError::authentication("key revoked")));

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(
            ready_reason(&h, &key),
            (ConditionStatus::False, REASON_DENIED.to_string())
        );
        assert_eq!(
            h.store.request(&key).unwrap().terminal_state(),
            Some(TerminalState::Denied)
        );
    }

    #[tokio::test]
    async fn test_ca_validation_failure_is_invalid_request() {
        let h = harness();
        let key = setup_ready(&h);
        h.signers
            .signer
            .push_sign(Err(CaError::validation("hostname not in zone")));

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(
            h.store.request(&key).unwrap().terminal_state(),
            Some(TerminalState::InvalidRequest)
        );
    }

    #[tokio::test]
    async fn test_unapproved_request_never_reaches_ca() {
        let h = harness();
        h.store.insert_issuer(ready_issuer("default", ConditionStatus::True));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        let mut req = request("default", "OriginIssuer", "issuer", &["example.com"]);
        req.status = None;
        h.store.insert_request(req);
        let key = ObjectKey::namespaced("default", "req");

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(h.signers.signer.sign_calls(), 0);
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_disabled_approval_gate_signs_unapproved_request() {
        let h = harness_with(ReconcilerSettings {
            disable_approved_check: true,
            ..ReconcilerSettings::default()
        });
        h.store.insert_issuer(ready_issuer("default", ConditionStatus::True));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        let mut req = request("default", "OriginIssuer", "issuer", &["example.com"]);
        req.status = None;
        h.store.insert_request(req);
        let key = ObjectKey::namespaced("default", "req");

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(h.signers.signer.sign_calls(), 1);
    }

    #[tokio::test]
    async fn test_external_denial_is_terminal() {
        let h = harness();
        h.store.insert_issuer(ready_issuer("default", ConditionStatus::True));
        let mut req = request("default", "OriginIssuer", "issuer", &["example.com"]);
        req.status = Some(CertificateRequestStatus {
            conditions: vec![condition(CONDITION_DENIED, ConditionStatus::True)],
            ..Default::default()
        });
        h.store.insert_request(req);
        let key = ObjectKey::namespaced("default", "req");

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(
            ready_reason(&h, &key),
            (ConditionStatus::False, REASON_DENIED.to_string())
        );
        assert!(h.store.request(&key).unwrap().status.unwrap().failure_time.is_some());
        assert_eq!(h.signers.signer.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_ca_certificate_requests_are_invalid() {
        let h = harness();
        let key = setup_ready(&h);
        let mut req = h.store.request(&key).unwrap();
        req.spec.is_ca = true;
        h.store.insert_request(req);

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(
            h.store.request(&key).unwrap().terminal_state(),
            Some(TerminalState::InvalidRequest)
        );
        assert_eq!(h.signers.signer.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_foreign_issuer_group_is_ignored() {
        let h = harness();
        let mut req = request("default", "Issuer", "letsencrypt", &["example.com"]);
        req.spec.issuer_ref.group = Some("cert-manager.io".to_string());
        h.store.insert_request(req);
        let key = ObjectKey::namespaced("default", "req");

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_missing_issuer_is_pending_with_backoff() {
        let h = harness();
        h.store
            .insert_request(request("default", "OriginIssuer", "issuer", &["example.com"]));
        let key = ObjectKey::namespaced("default", "req");

        assert_eq!(
            h.reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(5))
        );
        assert_eq!(
            ready_reason(&h, &key),
            (ConditionStatus::False, REASON_ISSUER_NOT_FOUND.to_string())
        );
        assert_eq!(
            h.reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(10))
        );
        // same condition again: no second write
        assert_eq!(h.store.writes(), 1);
    }

    #[tokio::test]
    async fn test_namespaced_issuer_in_other_namespace_is_not_used() {
        let h = harness();
        h.store.insert_issuer(ready_issuer("team-a", ConditionStatus::True));
        h.store.insert_secret("team-a", "service-key", "key", b"v1.0-key");
        h.store
            .insert_request(request("team-b", "OriginIssuer", "issuer", &["example.com"]));
        let key = ObjectKey::namespaced("team-b", "req");

        h.reconciler.reconcile(&key).await.unwrap();

        assert_eq!(ready_reason(&h, &key).1, REASON_ISSUER_NOT_FOUND);
        assert_eq!(h.signers.signer.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_cluster_issuer_serves_any_namespace() {
        let h = harness();
        h.store.insert_issuer(ready_cluster_issuer());
        h.store
            .insert_secret("cert-manager", "service-key", "key", b"v1.0-cluster");
        h.store.insert_request(request(
            "team-b",
            "ClusterOriginIssuer",
            "cluster-issuer",
            &["example.com"],
        ));
        let key = ObjectKey::namespaced("team-b", "req");

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(ready_reason(&h, &key).1, REASON_ISSUED);
        assert_eq!(h.signers.keys(), vec!["v1.0-cluster".to_string()]);
        assert_eq!(
            h.signers.signer.last_request().unwrap().request_type(),
            RequestType::OriginRsa
        );
    }

    #[tokio::test]
    async fn test_issuer_not_ready_is_pending() {
        let h = harness();
        h.store.insert_issuer(ready_issuer("default", ConditionStatus::False));
        h.store
            .insert_request(request("default", "OriginIssuer", "issuer", &["example.com"]));
        let key = ObjectKey::namespaced("default", "req");

        assert!(matches!(
            h.reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(_)
        ));
        assert_eq!(
            ready_reason(&h, &key),
            (ConditionStatus::False, REASON_ISSUER_NOT_READY.to_string())
        );
    }

    #[tokio::test]
    async fn test_deleted_secret_makes_requests_wait_on_issuer() {
        use crate::controller::reconciler::issuer::IssuerReconciler;

        let h = harness();
        let key = setup_ready(&h);
        let issuer_reconciler = IssuerReconciler::new(
            Arc::clone(&h.reconciler.ctx),
            IssuerKind::Namespaced,
        );
        let issuer_key = ObjectKey::namespaced("default", "issuer");

        h.store.remove_secret("default", "service-key");
        issuer_reconciler.reconcile(&issuer_key).await.unwrap();

        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        assert!(matches!(outcome, Outcome::RequeueAfter(_)));
        assert_eq!(
            ready_reason(&h, &key),
            (ConditionStatus::False, REASON_ISSUER_NOT_READY.to_string())
        );
        assert_eq!(h.signers.signer.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_secret_missing_on_ready_issuer_is_pending() {
        let h = harness();
        h.store.insert_issuer(ready_issuer("default", ConditionStatus::True));
        h.store
            .insert_request(request("default", "OriginIssuer", "issuer", &["example.com"]));
        let key = ObjectKey::namespaced("default", "req");

        assert!(matches!(
            h.reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(_)
        ));
        assert_eq!(ready_reason(&h, &key).1, REASON_ISSUER_NOT_READY);
    }

    #[tokio::test]
    async fn test_stale_write_is_a_conflict() {
        use crate::controller::store::ResourceStore;

        struct RacingStore {
            inner: Arc<FakeStore>,
        }

        #[async_trait]
        impl ResourceStore for RacingStore {
            async fn get_issuer(
                &self,
                kind: IssuerKind,
                key: &ObjectKey,
            ) -> Result<Option<Issuer>, ReconcilerError> {
                self.inner.get_issuer(kind, key).await
            }

            async fn replace_issuer_status(&self, issuer: &Issuer) -> Result<(), ReconcilerError> {
                self.inner.replace_issuer_status(issuer).await
            }

            async fn get_certificate_request(
                &self,
                key: &ObjectKey,
            ) -> Result<Option<CertificateRequest>, ReconcilerError> {
                let request = self.inner.get_certificate_request(key).await;
                // another writer updates the object right after our read
                self.inner.bump_request_version(key);
                request
            }

            async fn replace_certificate_request_status(
                &self,
                request: &CertificateRequest,
            ) -> Result<(), ReconcilerError> {
                self.inner.replace_certificate_request_status(request).await
            }

            async fn get_secret(
                &self,
                namespace: &str,
                name: &str,
            ) -> Result<Option<k8s_openapi::api::core::v1::Secret>, ReconcilerError> {
                self.inner.get_secret(namespace, name).await
            }
        }

        let h = harness();
        let key = setup_ready(&h);
        let ctx = Arc::new(Context {
            store: Arc::new(RacingStore {
                inner: Arc::clone(&h.store),
            }),
            ..(*h.reconciler.ctx).clone()
        });
        let reconciler = CertificateRequestReconciler::new(ctx);

        let result = reconciler.reconcile(&key).await;

        assert!(matches!(result, Err(ReconcilerError::Conflict(_))));
        assert_eq!(h.store.writes(), 0);
        assert!(h.store.request(&key).unwrap().status.unwrap().certificate.is_none());
    }
}
