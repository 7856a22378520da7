//! # Issuer Reconciler
//!
//! Validates an issuer's service key against the Origin CA and publishes the
//! result as the `Ready` condition. One instance runs per issuer kind; the
//! kinds differ only in where the credential secret is read from.
//!
//! | Outcome | Ready | Reason | Requeue |
//! |---|---|---|---|
//! | secret or key missing | False | SecretNotFound | no (secret watch re-triggers) |
//! | malformed key | False | InvalidCredential | no |
//! | CA rejects key | False | AuthenticationFailed / ValidationFailed | no |
//! | CA unavailable | Unknown | RateLimited / CAServerError / CAUnreachable | backoff |
//! | CA accepts key | True | Verified | revalidation interval |

use crate::controller::backoff::BackoffTracker;
use crate::controller::conditions::set_condition;
use crate::controller::reconciler::credentials::{
    credential_namespace, resolve_service_key, CredentialError,
};
use crate::controller::reconciler::status::ConditionUpdate;
use crate::controller::reconciler::types::{
    Context, ObjectKey, Outcome, Reconcile, ReconcilerError,
};
use crate::crd::{ConditionStatus, Issuer, IssuerKind, CONDITION_READY};
use crate::observability;
use crate::provider::origin_ca::{CaError, CaErrorKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Service key accepted by the CA
pub const REASON_VERIFIED: &str = "Verified";
/// Secret or key missing
pub const REASON_SECRET_NOT_FOUND: &str = "SecretNotFound";
/// Key cannot be used as a credential
pub const REASON_INVALID_CREDENTIAL: &str = "InvalidCredential";
/// CA rejected the key
pub const REASON_AUTHENTICATION_FAILED: &str = "AuthenticationFailed";
/// CA rejected the validation call as malformed
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
/// CA rate limited the validation call
pub const REASON_RATE_LIMITED: &str = "RateLimited";
/// CA failed to process the validation call
pub const REASON_CA_SERVER_ERROR: &str = "CAServerError";
/// CA could not be reached
pub const REASON_CA_UNREACHABLE: &str = "CAUnreachable";

/// Reconciler for one issuer kind
#[derive(Debug)]
pub struct IssuerReconciler {
    ctx: Arc<Context>,
    kind: IssuerKind,
    failures: BackoffTracker<ObjectKey>,
}

impl IssuerReconciler {
    /// Create a reconciler for `kind`
    pub fn new(ctx: Arc<Context>, kind: IssuerKind) -> Self {
        let failures = BackoffTracker::new(ctx.settings.backoff);
        Self {
            ctx,
            kind,
            failures,
        }
    }

    /// Decide the Ready condition for an issuer
    async fn validate(
        &self,
        key: &ObjectKey,
        issuer: &Issuer,
    ) -> Result<ConditionUpdate, ReconcilerError> {
        let namespace = credential_namespace(issuer, &self.ctx.settings)?;

        let service_key = match resolve_service_key(
            self.ctx.store.as_ref(),
            &namespace,
            issuer.service_key_ref(),
        )
        .await
        {
            Ok(service_key) => service_key,
            Err(CredentialError::Store(e)) => return Err(e),
            Err(e) if e.is_missing() => {
                self.failures.reset(key);
                return Ok(ConditionUpdate::done(
                    ConditionStatus::False,
                    REASON_SECRET_NOT_FOUND,
                    e.to_string(),
                ));
            }
            Err(e) => {
                self.failures.reset(key);
                return Ok(ConditionUpdate::done(
                    ConditionStatus::False,
                    REASON_INVALID_CREDENTIAL,
                    e.to_string(),
                ));
            }
        };

        let signer = match self.ctx.signers.signer(service_key) {
            Ok(signer) => signer,
            Err(e) => {
                self.failures.reset(key);
                return Ok(ConditionUpdate::done(
                    ConditionStatus::False,
                    REASON_INVALID_CREDENTIAL,
                    e.message,
                ));
            }
        };

        match signer.verify_credentials().await {
            Ok(()) => {
                self.failures.reset(key);
                Ok(ConditionUpdate {
                    status: ConditionStatus::True,
                    reason: REASON_VERIFIED,
                    message: "Origin CA accepted the service key".to_string(),
                    outcome: Outcome::RequeueAfter(self.ctx.settings.issuer_revalidate_interval),
                })
            }
            Err(e) if e.is_transient() => {
                let (attempt, delay) = self.failures.record_failure(key);
                let delay = e.retry_after.map_or(delay, |hint| delay.max(hint));
                warn!(
                    resource.kind = self.kind.as_str(),
                    resource.key = %key,
                    attempt,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "Issuer validation failed transiently"
                );
                Ok(ConditionUpdate {
                    status: ConditionStatus::Unknown,
                    reason: transient_reason(&e),
                    message: e.to_string(),
                    outcome: Outcome::RequeueAfter(delay),
                })
            }
            Err(e) => {
                self.failures.reset(key);
                let reason = if e.kind == CaErrorKind::Authentication {
                    REASON_AUTHENTICATION_FAILED
                } else {
                    REASON_VALIDATION_FAILED
                };
                Ok(ConditionUpdate::done(ConditionStatus::False, reason, e.to_string()))
            }
        }
    }
}

fn transient_reason(error: &CaError) -> &'static str {
    match error.kind {
        CaErrorKind::RateLimit => REASON_RATE_LIMITED,
        CaErrorKind::Server => REASON_CA_SERVER_ERROR,
        _ => REASON_CA_UNREACHABLE,
    }
}

#[async_trait]
impl Reconcile for IssuerReconciler {
    fn name(&self) -> &'static str {
        match self.kind {
            IssuerKind::Namespaced => "originissuer",
            IssuerKind::Cluster => "clusteroriginissuer",
        }
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcilerError> {
        let Some(issuer) = self.ctx.store.get_issuer(self.kind, key).await? else {
            debug!(resource.kind = self.kind.as_str(), resource.key = %key, "Issuer no longer exists");
            self.failures.reset(key);
            return Ok(Outcome::Done);
        };

        let update = self.validate(key, &issuer).await?;

        let mut conditions = issuer.conditions().to_vec();
        set_condition(
            &mut conditions,
            CONDITION_READY,
            update.status,
            update.reason,
            update.message.clone(),
            self.ctx.clock.now(),
        );

        if conditions.as_slice() == issuer.conditions() {
            debug!(
                resource.kind = self.kind.as_str(),
                resource.key = %key,
                reason = update.reason,
                "Skipping status update - conditions unchanged"
            );
        } else {
            let mut updated = issuer.clone();
            updated.status_mut().conditions = conditions;
            self.ctx.store.replace_issuer_status(&updated).await?;
            info!(
                resource.kind = self.kind.as_str(),
                resource.key = %key,
                ready = %update.status,
                reason = update.reason,
                "Issuer status updated"
            );
        }

        if let Outcome::RequeueAfter(_) = update.outcome {
            observability::metrics::increment_requeues_total(update.reason);
        }
        Ok(update.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::clock::FixedClock;
    use crate::controller::conditions::find_condition;
    use crate::controller::reconciler::types::ReconcilerSettings;
    use crate::controller::testing::{FakeSignerFactory, FakeStore};
    use crate::crd::{
        ClusterOriginIssuer, ClusterOriginIssuerSpec, OriginIssuer, OriginIssuerAuthentication,
        OriginIssuerSpec, RequestType, SecretKeySelector,
    };
    use chrono::TimeZone;
    use std::time::Duration;

    struct Harness {
        store: Arc<FakeStore>,
        signers: Arc<FakeSignerFactory>,
        clock: Arc<FixedClock>,
        ctx: Arc<Context>,
    }

    fn harness() -> Harness {
        let store = Arc::new(FakeStore::default());
        let signers = Arc::new(FakeSignerFactory::default());
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        ));
        let ctx = Arc::new(Context {
            store: store.clone(),
            signers: signers.clone(),
            clock: clock.clone(),
            settings: ReconcilerSettings::default(),
        });
        Harness {
            store,
            signers,
            clock,
            ctx,
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

    fn namespaced_issuer(namespace: &str) -> Issuer {
        let mut issuer = OriginIssuer::new(
            "issuer",
            OriginIssuerSpec {
                request_type: RequestType::OriginEcc,
                auth: auth(),
            },
        );
        issuer.metadata.namespace = Some(namespace.to_string());
        Issuer::Namespaced(issuer)
    }

    fn cluster_issuer() -> Issuer {
        Issuer::Cluster(ClusterOriginIssuer::new(
            "cluster-issuer",
            ClusterOriginIssuerSpec {
                request_type: RequestType::OriginRsa,
                auth: auth(),
            },
        ))
    }

    fn ready(h: &Harness, kind: IssuerKind, key: &ObjectKey) -> (ConditionStatus, String) {
        let issuer = h.store.issuer(kind, key).unwrap();
        let condition = find_condition(issuer.conditions(), CONDITION_READY).unwrap();
        (condition.status, condition.reason.clone().unwrap())
    }

    #[tokio::test]
    async fn test_valid_credentials_mark_issuer_ready() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key\n");
        let key = ObjectKey::namespaced("default", "issuer");

        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);
        let outcome = reconciler.reconcile(&key).await.unwrap();

        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(3600)));
        assert_eq!(
            ready(&h, IssuerKind::Namespaced, &key),
            (ConditionStatus::True, REASON_VERIFIED.to_string())
        );
        assert_eq!(h.signers.keys(), vec!["v1.0-key".to_string()]);
        assert_eq!(h.signers.signer.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_secret_sets_secret_not_found_without_requeue() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        let key = ObjectKey::namespaced("default", "issuer");

        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);
        let outcome = reconciler.reconcile(&key).await.unwrap();

        assert_eq!(outcome, Outcome::Done);
        assert_eq!(
            ready(&h, IssuerKind::Namespaced, &key),
            (ConditionStatus::False, REASON_SECRET_NOT_FOUND.to_string())
        );
        assert_eq!(h.signers.signer.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_key_in_secret_is_secret_not_found() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        h.store.insert_secret("default", "service-key", "other", b"v1.0-key");
        let key = ObjectKey::namespaced("default", "issuer");

        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);
        assert_eq!(reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(
            ready(&h, IssuerKind::Namespaced, &key).1,
            REASON_SECRET_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_malformed_key_is_invalid_credential() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        h.store.insert_secret("default", "service-key", "key", b"not a key");
        let key = ObjectKey::namespaced("default", "issuer");

        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);
        assert_eq!(reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(
            ready(&h, IssuerKind::Namespaced, &key),
            (ConditionStatus::False, REASON_INVALID_CREDENTIAL.to_string())
        );
    }

    #[tokio::test]
    async fn test_rejected_key_is_permanent() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        h.signers
            .signer
            .push_verify(Err(CaError::authentication("invalid service key")));
        let key = ObjectKey::namespaced("default", "issuer");

        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);
        assert_eq!(reconciler.reconcile(&key).await.unwrap(), Outcome::Done);
        assert_eq!(
            ready(&h, IssuerKind::Namespaced, &key),
            (ConditionStatus::False, REASON_AUTHENTICATION_FAILED.to_string())
        );
    }

    #[tokio::test]
    async fn test_transient_failure_sets_unknown_and_backs_off() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        h.signers.signer.push_verify(Err(CaError::server("502")));
        h.signers.signer.push_verify(Err(CaError::network("refused")));
        h.signers.signer.push_verify(Err(CaError::rate_limit(
            "slow down",
            Some(Duration::from_secs(60)),
        )));
        let key = ObjectKey::namespaced("default", "issuer");
        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);

        assert_eq!(
            reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(5))
        );
        assert_eq!(
            ready(&h, IssuerKind::Namespaced, &key),
            (ConditionStatus::Unknown, REASON_CA_SERVER_ERROR.to_string())
        );

        assert_eq!(
            reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(10))
        );
        assert_eq!(ready(&h, IssuerKind::Namespaced, &key).1, REASON_CA_UNREACHABLE);

        assert_eq!(
            reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(60))
        );
        assert_eq!(ready(&h, IssuerKind::Namespaced, &key).1, REASON_RATE_LIMITED);

        // success resets the backoff sequence
        assert_eq!(
            reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(3600))
        );
        h.signers.signer.push_verify(Err(CaError::server("500")));
        assert_eq!(
            reconciler.reconcile(&key).await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_rewritten() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        let key = ObjectKey::namespaced("default", "issuer");
        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);

        reconciler.reconcile(&key).await.unwrap();
        let first = h.store.issuer(IssuerKind::Namespaced, &key).unwrap();
        h.clock.advance(chrono::Duration::hours(1));
        reconciler.reconcile(&key).await.unwrap();

        assert_eq!(h.store.writes(), 1);
        assert_eq!(h.store.issuer(IssuerKind::Namespaced, &key).unwrap(), first);
    }

    #[tokio::test]
    async fn test_secret_deleted_after_ready() {
        let h = harness();
        h.store.insert_issuer(namespaced_issuer("default"));
        h.store.insert_secret("default", "service-key", "key", b"v1.0-key");
        let key = ObjectKey::namespaced("default", "issuer");
        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Namespaced);

        reconciler.reconcile(&key).await.unwrap();
        h.store.remove_secret("default", "service-key");
        h.clock.advance(chrono::Duration::minutes(5));
        let outcome = reconciler.reconcile(&key).await.unwrap();

        assert_eq!(outcome, Outcome::Done);
        let issuer = h.store.issuer(IssuerKind::Namespaced, &key).unwrap();
        let condition = find_condition(issuer.conditions(), CONDITION_READY).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason.as_deref(), Some(REASON_SECRET_NOT_FOUND));
        assert_eq!(
            condition.last_transition_time.as_deref(),
            Some("2026-10-19T12:05:00Z")
        );
    }

    #[tokio::test]
    async fn test_cluster_issuer_reads_cluster_resource_namespace() {
        let h = harness();
        h.store.insert_issuer(cluster_issuer());
        h.store.insert_secret("default", "service-key", "key", b"wrong-namespace");
        h.store.insert_secret("cert-manager", "service-key", "key", b"v1.0-cluster");
        let key = ObjectKey::cluster("cluster-issuer");

        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Cluster);
        reconciler.reconcile(&key).await.unwrap();

        assert_eq!(h.signers.keys(), vec!["v1.0-cluster".to_string()]);
        assert_eq!(
            ready(&h, IssuerKind::Cluster, &key),
            (ConditionStatus::True, REASON_VERIFIED.to_string())
        );
    }

    #[tokio::test]
    async fn test_deleted_issuer_is_noop() {
        let h = harness();
        let reconciler = IssuerReconciler::new(h.ctx.clone(), IssuerKind::Cluster);
        let outcome = reconciler
            .reconcile(&ObjectKey::cluster("gone"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(h.store.writes(), 0);
    }
}
