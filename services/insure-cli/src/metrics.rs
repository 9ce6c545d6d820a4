//! Prometheus exposition for the pipeline metrics
//!
//! The CLI has no listener to scrape, so `--metrics` renders the text format
//! to stderr when the command finishes.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
