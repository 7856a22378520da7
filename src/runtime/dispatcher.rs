//! # Dispatcher
//!
//! Runs a fixed pool of workers over one [`WorkQueue`]. The queue serializes
//! work per key, so a key is reconciled by at most one worker at a time while
//! distinct keys run in parallel.
//!
//! | Result | Action |
//! |--------|--------|
//! | `Ok(Done)` | forget the key's error and conflict counts |
//! | `Ok(RequeueAfter(d))` | forget the counts, re-add after `d` |
//! | `Err(Conflict)` | re-add after the short per-key conflict backoff |
//! | `Err(e)` | re-add after the per-key error backoff |
//!
//! On shutdown, in-flight reconciliations are dropped at their next await
//! point. Status is written last, so an abandoned reconciliation leaves no
//! partial write and is safe to re-run after restart.

use crate::constants::{CONFLICT_BACKOFF_BASE_MS, CONFLICT_BACKOFF_MAX_MS};
use crate::controller::backoff::{BackoffTracker, ExponentialBackoff};
use crate::controller::reconciler::{ObjectKey, Outcome, Reconcile};
use crate::observability;
use crate::runtime::error_policy::handle_reconciliation_error;
use crate::runtime::queue::WorkQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, Instrument};

/// Worker pool driving one reconciler
pub struct Dispatcher {
    reconciler: Arc<dyn Reconcile>,
    queue: WorkQueue<ObjectKey>,
    errors: Arc<BackoffTracker<ObjectKey>>,
    conflicts: Arc<BackoffTracker<ObjectKey>>,
    workers: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("controller", &self.reconciler.name())
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        reconciler: Arc<dyn Reconcile>,
        error_backoff: ExponentialBackoff,
        workers: usize,
    ) -> Self {
        Self {
            reconciler,
            queue: WorkQueue::new(),
            errors: Arc::new(BackoffTracker::new(error_backoff)),
            conflicts: Arc::new(BackoffTracker::new(ExponentialBackoff::new(
                Duration::from_millis(CONFLICT_BACKOFF_BASE_MS),
                Duration::from_millis(CONFLICT_BACKOFF_MAX_MS),
            ))),
            workers: workers.max(1),
        }
    }

    /// Queue feeding this dispatcher
    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.queue.clone()
    }

    /// Process keys until `shutdown` flips to `true`
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let name = self.reconciler.name();
        info!(controller = name, workers = self.workers, "Starting workers");

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            workers.spawn(worker(
                Arc::clone(&self.reconciler),
                self.queue.clone(),
                Arc::clone(&self.errors),
                Arc::clone(&self.conflicts),
                shutdown.clone(),
            ));
        }

        let mut shutdown = shutdown;
        wait_for_shutdown(&mut shutdown).await;
        self.queue.shutdown();
        while workers.join_next().await.is_some() {}
        info!(controller = name, "Workers stopped");
    }
}

/// Resolve once the shutdown flag is set or its sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn worker(
    reconciler: Arc<dyn Reconcile>,
    queue: WorkQueue<ObjectKey>,
    errors: Arc<BackoffTracker<ObjectKey>>,
    conflicts: Arc<BackoffTracker<ObjectKey>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = reconciler.name();
    loop {
        let key = tokio::select! {
            key = queue.get() => key,
            () = wait_for_shutdown(&mut shutdown) => None,
        };
        let Some(key) = key else {
            break;
        };

        let span = tracing::info_span!("reconcile", controller = name, resource.key = %key);
        let started = Instant::now();
        let result = tokio::select! {
            result = reconciler.reconcile(&key).instrument(span) => Some(result),
            () = wait_for_shutdown(&mut shutdown) => None,
        };
        let Some(result) = result else {
            debug!(controller = name, resource.key = %key, "Abandoning reconciliation on shutdown");
            queue.done(&key);
            break;
        };

        observability::metrics::increment_reconciliations(name);
        observability::metrics::observe_reconciliation_duration(
            name,
            started.elapsed().as_secs_f64(),
        );

        match result {
            Ok(Outcome::Done) => {
                errors.reset(&key);
                conflicts.reset(&key);
            }
            Ok(Outcome::RequeueAfter(delay)) => {
                errors.reset(&key);
                conflicts.reset(&key);
                queue.add_after(key.clone(), delay);
            }
            Err(error) => {
                let delay = handle_reconciliation_error(name, &key, &error, &errors, &conflicts);
                queue.add_after(key.clone(), delay);
            }
        }
        queue.done(&key);
    }
}
