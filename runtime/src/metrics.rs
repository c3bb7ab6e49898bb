//! Prometheus metrics for the render pipeline.
//!
//! Recording is always on; the numbers go nowhere until a recorder is
//! installed, which [`MetricsServer::start`] does.
//!
//! # Example
//!
//! ```rust,no_run
//! use pagekit_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // The host serves `server.render()` at /metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Shortcodes processed, labelled by `outcome`.
pub const SHORTCODES_TOTAL: &str = "pagekit_shortcodes_total";
/// Failed event handlers, labelled by `event`.
pub const HANDLER_FAILURES_TOTAL: &str = "pagekit_handler_failures_total";
/// Whole-page render latency.
pub const PAGE_RENDER_DURATION: &str = "pagekit_page_render_duration_seconds";
/// Pages served from the render cache.
pub const RENDER_CACHE_HITS_TOTAL: &str = "pagekit_render_cache_hits_total";
/// Pages rendered because the cache missed.
pub const RENDER_CACHE_MISSES_TOTAL: &str = "pagekit_render_cache_misses_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address the host exposes it on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server for `addr`; nothing is installed yet.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or installed. A
    /// recorder that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Configured address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The recorder handle, once started.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(SHORTCODES_TOTAL, "Shortcodes processed, by outcome");
    describe_counter!(HANDLER_FAILURES_TOTAL, "Event handler failures, by event");
    describe_histogram!(PAGE_RENDER_DURATION, "Time taken to render a page");
    describe_counter!(RENDER_CACHE_HITS_TOTAL, "Pages served from the render cache");
    describe_counter!(RENDER_CACHE_MISSES_TOTAL, "Page renders that missed the cache");
}

/// Dispatcher metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record one shortcode outcome (`rendered`, `unclaimed`, `failed`, `skipped`).
    pub fn record_outcome(outcome: &'static str) {
        counter!(SHORTCODES_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Record a failed handler.
    pub fn record_handler_failure(event: &'static str) {
        counter!(HANDLER_FAILURES_TOTAL, "event" => event).increment(1);
    }
}

/// Renderer metrics recorder.
pub struct RenderMetrics;

impl RenderMetrics {
    /// Record a finished page render.
    pub fn record_render(duration: Duration) {
        histogram!(PAGE_RENDER_DURATION).record(duration.as_secs_f64());
    }

    /// Record a cache hit.
    pub fn record_cache_hit() {
        counter!(RENDER_CACHE_HITS_TOTAL).increment(1);
    }

    /// Record a cache miss.
    pub fn record_cache_miss() {
        counter!(RENDER_CACHE_MISSES_TOTAL).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn recorded_metrics_are_rendered() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        DispatchMetrics::record_outcome("rendered");
        DispatchMetrics::record_handler_failure("postModuleGetData");
        RenderMetrics::record_render(Duration::from_millis(12));
        RenderMetrics::record_cache_hit();

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains(SHORTCODES_TOTAL));
            assert!(rendered.contains(HANDLER_FAILURES_TOTAL));
            assert!(rendered.contains(RENDER_CACHE_HITS_TOTAL));
        }
    }
}
