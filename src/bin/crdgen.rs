//! # CRD Generator
//!
//! Prints the `OriginIssuer` and `ClusterOriginIssuer` CustomResourceDefinitions
//! as a multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/bases/issuers.yaml
//! crdgen | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use kube::core::CustomResourceExt;
use origin_ca_issuer::crd::{ClusterOriginIssuer, OriginIssuer};

fn main() -> Result<()> {
    let crds = [OriginIssuer::crd(), ClusterOriginIssuer::crd()];
    for crd in &crds {
        let yaml = serde_yaml::to_string(crd).context("Failed to serialize CRD to YAML")?;
        print!("---\n{yaml}");
    }
    Ok(())
}
