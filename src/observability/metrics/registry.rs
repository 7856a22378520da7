//! # Metrics Registry
//!
//! Process wide Prometheus registry served on `/metrics`.

use prometheus::Registry;
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
