//! # Constants
//!
//! Default values shared by configuration, reconcilers and the runtime.

/// API group of the issuer resources owned by this controller
pub const ISSUER_GROUP: &str = "cert-manager.k8s.cloudflare.com";

/// Kind of the namespaced issuer
pub const ORIGIN_ISSUER_KIND: &str = "OriginIssuer";

/// Kind of the cluster-scoped issuer
pub const CLUSTER_ORIGIN_ISSUER_KIND: &str = "ClusterOriginIssuer";

/// Field manager name used for status patches
pub const FIELD_MANAGER: &str = "origin-ca-issuer";

/// Default Origin CA API endpoint
pub const DEFAULT_CA_ENDPOINT: &str = "https://api.cloudflare.com/client/v4";

/// Default CA HTTP timeout (seconds)
pub const DEFAULT_CA_TIMEOUT_SECS: u64 = 30;

/// Namespace holding credentials referenced by cluster-scoped issuers
pub const DEFAULT_CLUSTER_RESOURCE_NAMESPACE: &str = "cert-manager";

/// Default Kubernetes API client rate limit (requests per second)
pub const DEFAULT_KUBE_API_QPS: f64 = 5.0;

/// Default Kubernetes API client burst size
pub const DEFAULT_KUBE_API_BURST: u32 = 10;

/// Deadline for a single resource store call (seconds)
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

/// Worker tasks per reconciler
pub const DEFAULT_WORKERS: usize = 4;

/// Transient CA failures tolerated before a request is failed for good
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// First retry delay after a transient failure (seconds)
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;

/// Upper bound for retry delays (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// How often a Ready issuer re-validates its credential (seconds)
pub const DEFAULT_ISSUER_REVALIDATE_SECS: u64 = 3600;

/// Default HTTP server port for metrics and probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before restarting a watch after an authorization or unknown error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// First retry delay after a write conflict (milliseconds)
pub const CONFLICT_BACKOFF_BASE_MS: u64 = 100;

/// Cap on the retry delay after repeated write conflicts (milliseconds)
pub const CONFLICT_BACKOFF_MAX_MS: u64 = 10_000;

/// Initial watch backoff after 429 responses (milliseconds)
pub const DEFAULT_WATCH_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Upper bound for the watch backoff after 429 responses (milliseconds)
pub const DEFAULT_WATCH_MAX_BACKOFF_MS: u64 = 30_000;

/// Requested certificate lifetime when a request carries no duration (days)
pub const DEFAULT_VALIDITY_DAYS: u32 = 90;
