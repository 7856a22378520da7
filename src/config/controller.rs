//! # Controller Flags
//!
//! Every flag can also be set through the environment variable named next to
//! it, so the deployment can feed them from a ConfigMap.

use crate::constants::*;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::reconciler::ReconcilerSettings;
use crate::provider::origin_ca::CaClientConfig;
use clap::Parser;
use std::time::Duration;

/// Flag combination that cannot run
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--cluster-resource-namespace must not be empty")]
    EmptyNamespace,
    #[error("--{flag} must be positive")]
    NotPositive { flag: &'static str },
    #[error("--backoff-max-secs ({max}) must not be below --backoff-base-secs ({base})")]
    BackoffCapBelowBase { base: u64, max: u64 },
    #[error("--ca-endpoint is not a valid URL: {0}")]
    InvalidEndpoint(String),
}

/// Origin CA issuer controller
#[derive(Debug, Clone, Parser)]
#[command(name = "origin-ca-issuer", version, about, long_about = None)]
pub struct ControllerConfig {
    /// Namespace holding service key secrets of ClusterOriginIssuers
    #[arg(long, env = "CLUSTER_RESOURCE_NAMESPACE", default_value = DEFAULT_CLUSTER_RESOURCE_NAMESPACE)]
    pub cluster_resource_namespace: String,

    /// Sign CertificateRequests without waiting for them to be approved
    #[arg(long, env = "DISABLE_APPROVED_CHECK")]
    pub disable_approved_check: bool,

    /// Origin CA API endpoint
    #[arg(long, env = "CA_ENDPOINT", default_value = DEFAULT_CA_ENDPOINT)]
    pub ca_endpoint: String,

    /// Timeout of a single Origin CA API call (seconds)
    #[arg(long, env = "CA_TIMEOUT_SECS", default_value_t = DEFAULT_CA_TIMEOUT_SECS)]
    pub ca_timeout_secs: u64,

    /// Sustained Kubernetes API requests per second
    #[arg(long, env = "KUBE_API_QPS", default_value_t = DEFAULT_KUBE_API_QPS)]
    pub kube_api_qps: f64,

    /// Kubernetes API request burst
    #[arg(long, env = "KUBE_API_BURST", default_value_t = DEFAULT_KUBE_API_BURST)]
    pub kube_api_burst: u32,

    /// Timeout of a single Kubernetes API call (seconds)
    #[arg(long, env = "STORE_TIMEOUT_SECS", default_value_t = DEFAULT_STORE_TIMEOUT_SECS)]
    pub store_timeout_secs: u64,

    /// Concurrent reconciliations per controller
    #[arg(long, env = "WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Transient signing failures tolerated before a request fails for good
    #[arg(long, env = "MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// First retry delay (seconds)
    #[arg(long, env = "BACKOFF_BASE_SECS", default_value_t = DEFAULT_BACKOFF_BASE_SECS)]
    pub backoff_base_secs: u64,

    /// Retry delay cap (seconds)
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = DEFAULT_BACKOFF_MAX_SECS)]
    pub backoff_max_secs: u64,

    /// Re-validation period of a Ready issuer (seconds)
    #[arg(long, env = "ISSUER_REVALIDATE_SECS", default_value_t = DEFAULT_ISSUER_REVALIDATE_SECS)]
    pub issuer_revalidate_secs: u64,
}

impl ControllerConfig {
    /// Reject combinations the controller cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_resource_namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if !(self.kube_api_qps > 0.0) {
            return Err(ConfigError::NotPositive {
                flag: "kube-api-qps",
            });
        }
        let positive = [
            ("kube-api-burst", u64::from(self.kube_api_burst)),
            ("workers", self.workers as u64),
            ("ca-timeout-secs", self.ca_timeout_secs),
            ("store-timeout-secs", self.store_timeout_secs),
            ("backoff-base-secs", self.backoff_base_secs),
        ];
        if let Some((flag, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::NotPositive { flag: *flag });
        }
        if self.backoff_max_secs < self.backoff_base_secs {
            return Err(ConfigError::BackoffCapBelowBase {
                base: self.backoff_base_secs,
                max: self.backoff_max_secs,
            });
        }
        reqwest::Url::parse(&self.ca_endpoint)
            .map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))?;
        Ok(())
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            cluster_resource_namespace: self.cluster_resource_namespace.clone(),
            disable_approved_check: self.disable_approved_check,
            max_retries: self.max_retries,
            backoff: ExponentialBackoff::new(
                Duration::from_secs(self.backoff_base_secs),
                Duration::from_secs(self.backoff_max_secs),
            ),
            issuer_revalidate_interval: Duration::from_secs(self.issuer_revalidate_secs),
        }
    }

    pub fn ca_client_config(&self) -> CaClientConfig {
        CaClientConfig {
            endpoint: self.ca_endpoint.clone(),
            timeout: Duration::from_secs(self.ca_timeout_secs),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}
