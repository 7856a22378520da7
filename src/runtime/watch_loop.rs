//! # Watch Loop
//!
//! Binds the dispatchers to Kubernetes watches.
//!
//! - `OriginIssuer` and `ClusterOriginIssuer` events queue the issuer; both
//!   streams also feed reflector stores
//! - `Secret` metadata events queue every issuer whose service key lives in
//!   the changed secret (looked up in the reflector stores)
//! - `CertificateRequest` events queue the request when it references this
//!   controller's issuer group
//!
//! Watch stream errors are classified and paused on by the error policy; the
//! watcher then resumes or re-lists on its next poll.

use crate::constants::{self, ISSUER_GROUP};
use crate::controller::reconciler::{
    CertificateRequestReconciler, Context, IssuerReconciler, ObjectKey,
};
use crate::crd::{CertificateRequest, ClusterOriginIssuer, IssuerKind, IssuerObject, OriginIssuer};
use crate::runtime::dispatcher::{wait_for_shutdown, Dispatcher};
use crate::runtime::error_policy::handle_watch_stream_error;
use crate::runtime::queue::WorkQueue;
use anyhow::Result;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use kube_runtime::reflector;
use kube_runtime::watcher::{self, metadata_watcher, watcher};
use kube_runtime::WatchStreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Whether a certificate request names an issuer of this controller
pub fn is_owned_request(request: &CertificateRequest) -> bool {
    request.spec.issuer_ref.group.as_deref() == Some(ISSUER_GROUP)
}

/// Issuers whose service key lives in the secret `namespace/name`
///
/// Namespaced issuers read secrets from their own namespace; cluster issuers
/// from the cluster resource namespace.
pub fn issuers_for_secret(
    namespace: &str,
    name: &str,
    issuers: &[Arc<OriginIssuer>],
    cluster_issuers: &[Arc<ClusterOriginIssuer>],
    cluster_resource_namespace: &str,
) -> Vec<(IssuerKind, ObjectKey)> {
    let mut keys: Vec<(IssuerKind, ObjectKey)> = issuers
        .iter()
        .filter(|issuer| {
            issuer.metadata.namespace.as_deref() == Some(namespace)
                && issuer.service_key_ref().name == name
        })
        .filter_map(|issuer| ObjectKey::from_resource(issuer.as_ref()))
        .map(|key| (IssuerKind::Namespaced, key))
        .collect();

    if namespace == cluster_resource_namespace {
        keys.extend(
            cluster_issuers
                .iter()
                .filter(|issuer| issuer.service_key_ref().name == name)
                .filter_map(|issuer| issuer.metadata.name.clone())
                .map(|issuer_name| (IssuerKind::Cluster, ObjectKey::cluster(issuer_name))),
        );
    }
    keys
}

/// Run all controllers until `shutdown` flips to `true`
pub async fn run_watch_loop(
    client: Client,
    ctx: Arc<Context>,
    workers: usize,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let backoff = ctx.settings.backoff;
    let issuers = Dispatcher::new(
        Arc::new(IssuerReconciler::new(Arc::clone(&ctx), IssuerKind::Namespaced)),
        backoff,
        workers,
    );
    let cluster_issuers = Dispatcher::new(
        Arc::new(IssuerReconciler::new(Arc::clone(&ctx), IssuerKind::Cluster)),
        backoff,
        workers,
    );
    let requests = Dispatcher::new(
        Arc::new(CertificateRequestReconciler::new(Arc::clone(&ctx))),
        backoff,
        workers,
    );

    let issuer_queue = issuers.queue();
    let cluster_issuer_queue = cluster_issuers.queue();
    let request_queue = requests.queue();

    let (issuer_reader, issuer_writer) = reflector::store::<OriginIssuer>();
    let (cluster_issuer_reader, cluster_issuer_writer) = reflector::store::<ClusterOriginIssuer>();

    let issuer_events = watcher(
        Api::<OriginIssuer>::all(client.clone()),
        watcher::Config::default(),
    )
    .reflect(issuer_writer);
    let cluster_issuer_events = watcher(
        Api::<ClusterOriginIssuer>::all(client.clone()),
        watcher::Config::default(),
    )
    .reflect(cluster_issuer_writer);
    let request_events = watcher(
        Api::<CertificateRequest>::all(client.clone()),
        watcher::Config::default(),
    );
    let secret_events = metadata_watcher(Api::<Secret>::all(client), watcher::Config::default());

    let mut tasks = JoinSet::new();
    tasks.spawn(issuers.run(shutdown.clone()));
    tasks.spawn(cluster_issuers.run(shutdown.clone()));
    tasks.spawn(requests.run(shutdown.clone()));

    {
        let queue = issuer_queue.clone();
        tasks.spawn(drive_watch(
            "originissuers",
            issuer_events,
            move |issuer: &OriginIssuer| enqueue(&queue, ObjectKey::from_resource(issuer)),
            shutdown.clone(),
        ));
    }
    {
        let queue = cluster_issuer_queue.clone();
        tasks.spawn(drive_watch(
            "clusteroriginissuers",
            cluster_issuer_events,
            move |issuer: &ClusterOriginIssuer| enqueue(&queue, ObjectKey::from_resource(issuer)),
            shutdown.clone(),
        ));
    }
    tasks.spawn(drive_watch(
        "certificaterequests",
        request_events,
        move |request: &CertificateRequest| {
            if is_owned_request(request) {
                enqueue(&request_queue, ObjectKey::from_resource(request));
            }
        },
        shutdown.clone(),
    ));
    {
        let cluster_resource_namespace = ctx.settings.cluster_resource_namespace.clone();
        tasks.spawn(drive_watch(
            "secrets",
            secret_events,
            move |secret: &kube::core::PartialObjectMeta<Secret>| {
                let (Some(namespace), Some(name)) = (
                    secret.metadata.namespace.as_deref(),
                    secret.metadata.name.as_deref(),
                ) else {
                    return;
                };
                let affected = issuers_for_secret(
                    namespace,
                    name,
                    &issuer_reader.state(),
                    &cluster_issuer_reader.state(),
                    &cluster_resource_namespace,
                );
                for (kind, key) in affected {
                    debug!(secret.namespace = namespace, secret.name = name, issuer = %key, "Secret changed, revalidating issuer");
                    match kind {
                        IssuerKind::Namespaced => issuer_queue.add(key),
                        IssuerKind::Cluster => cluster_issuer_queue.add(key),
                    }
                }
            },
            shutdown,
        ));
    }

    info!("Controllers started, watching OriginIssuers, ClusterOriginIssuers, CertificateRequests and Secrets");
    while tasks.join_next().await.is_some() {}
    info!("All controllers stopped");
    Ok(())
}

fn enqueue(queue: &WorkQueue<ObjectKey>, key: Option<ObjectKey>) {
    if let Some(key) = key {
        queue.add(key);
    }
}

/// Feed every object change of one watch to `on_change` until shutdown
async fn drive_watch<K, S, F>(
    watch: &'static str,
    stream: S,
    mut on_change: F,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Send,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
    F: FnMut(&K) + Send,
{
    let backoff = AtomicU64::new(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS);
    let mut stream = std::pin::pin!(stream);

    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            () = wait_for_shutdown(&mut shutdown) => break,
        };

        match event {
            Some(Ok(
                watcher::Event::Apply(object)
                | watcher::Event::InitApply(object)
                | watcher::Event::Delete(object),
            )) => {
                backoff.store(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS, Ordering::Relaxed);
                on_change(&object);
            }
            Some(Ok(watcher::Event::Init)) => debug!(watch, "Watch listing"),
            Some(Ok(watcher::Event::InitDone)) => info!(watch, "Watch initial list complete"),
            Some(Err(e)) => {
                handle_watch_stream_error(
                    watch,
                    &e.to_string(),
                    &backoff,
                    constants::DEFAULT_WATCH_MAX_BACKOFF_MS,
                )
                .await;
            }
            None => {
                warn!(watch, "Watch stream ended");
                break;
            }
        }
    }
    debug!(watch, "Watch stopped");
}
