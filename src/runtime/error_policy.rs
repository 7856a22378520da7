//! # Error Policy
//!
//! Backoff for failed reconciliations and classification of watch stream
//! errors.

use crate::constants;
use crate::controller::backoff::BackoffTracker;
use crate::controller::reconciler::{ObjectKey, ReconcilerError};
use crate::observability;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Delay before a failed reconciliation is retried
///
/// Backoff is tracked per object so one failing object does not slow down
/// the others. A conflict means the object changed under us; it is retried
/// quickly against the fresh version on its own short backoff and does not
/// count as a reconciliation error.
pub fn handle_reconciliation_error(
    controller: &str,
    key: &ObjectKey,
    error: &ReconcilerError,
    errors: &BackoffTracker<ObjectKey>,
    conflicts: &BackoffTracker<ObjectKey>,
) -> Duration {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        controller,
        resource.key = %key,
        error = %error
    );
    let _error_guard = error_span.enter();

    if let ReconcilerError::Conflict(_) = error {
        let (conflict_count, delay) = conflicts.record_failure(key);
        info!(
            "Object was modified during reconciliation, refetching in {}ms (conflict count: {})",
            delay.as_millis(),
            conflict_count
        );
        observability::metrics::increment_requeues_total("conflict");
        return delay;
    }

    error!("Reconciliation error for {}: {}", key, error);
    observability::metrics::increment_reconciliation_errors(controller);

    let (error_count, delay) = errors.record_failure(key);
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    info!(
        "Retrying with exponential backoff: {}s (error count: {}, next retry: {}, trigger source: error-backoff)",
        delay.as_secs(),
        error_count,
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    delay
}

/// Kind of watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// Credentials rejected; RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old; the watch re-lists
    Expired,
    /// API server throttling or storage re-initializing
    TooManyRequests,
    /// Watched resource type missing (CRD not installed)
    NotFound,
    Other,
}

/// Classify a watch stream error from its rendered message
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        WatchErrorClass::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorClass::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorClass::TooManyRequests
    } else if error_string.contains("ObjectNotFound")
        || (error_string.contains("404") && error_string.contains("not found"))
    {
        WatchErrorClass::NotFound
    } else {
        WatchErrorClass::Other
    }
}

/// Log a watch stream error and pause before the watch is polled again
///
/// `backoff` carries the current throttling delay across calls; it doubles on
/// every 429 up to `max_backoff_ms`.
pub async fn handle_watch_stream_error(
    watch: &str,
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
) -> WatchErrorClass {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        watch,
        error = %error_string
    );
    let _error_guard = error_span.enter();

    let class = classify_watch_error(error_string);
    let restart_delay = Duration::from_secs(constants::DEFAULT_WATCH_RESTART_DELAY_SECS);
    match class {
        WatchErrorClass::Unauthorized => {
            error!("Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("Verify the ClusterRole and ClusterRoleBinding of the origin-ca-issuer ServiceAccount:");
            error!("  kubectl auth can-i watch {} --as=system:serviceaccount:<namespace>:origin-ca-issuer --all-namespaces", watch);
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                restart_delay.as_secs()
            );
            tokio::time::sleep(restart_delay).await;
        }
        WatchErrorClass::Expired => {
            warn!("Watch resource version expired (410) - watch will re-list");
        }
        WatchErrorClass::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server throttling (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
        }
        WatchErrorClass::NotFound => {
            error!("Watched resource type not found; is the CRD installed?");
            error!("Installation: crdgen | kubectl apply -f -");
            tokio::time::sleep(restart_delay).await;
        }
        WatchErrorClass::Other => {
            error!("Watch stream error: {}", error_string);
            tokio::time::sleep(restart_delay).await;
        }
    }
    class
}
