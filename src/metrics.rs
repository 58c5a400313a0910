//! Metrics support for the server

use std::sync::{Arc, RwLock};

use iroh_metrics::{Counter, MetricsGroup, Registry};

/// Metrics for the confession board
#[derive(Debug, Default, MetricsGroup)]
#[metrics(name = "confession_board")]
pub struct Metrics {
    /// Number of HTTP requests
    pub http_requests: Counter,
    /// Number of HTTP requests with a 2xx status code
    pub http_requests_success: Counter,
    /// Number of HTTP requests with a non-2xx status code
    pub http_requests_error: Counter,
    /// Total duration of all HTTP requests
    pub http_requests_duration_ms: Counter,

    /// Collection reads from the remote store
    pub store_reads: Counter,
    /// Collection reads that failed
    pub store_read_errors: Counter,
    /// Collection writes accepted by the remote store
    pub store_writes: Counter,
    /// Collection writes rejected because the revision was stale
    pub store_write_conflicts: Counter,
    /// Collection writes rejected for any other reason
    pub store_write_errors: Counter,

    /// Confessions appended
    pub confessions_appended: Counter,
    /// Appends rejected by validation
    pub confessions_rejected: Counter,
}

/// A registry holding `metrics`, ready to be served by
/// [`iroh_metrics::service::start_metrics_server`].
pub fn registry(metrics: Arc<Metrics>) -> Arc<RwLock<Registry>> {
    let mut registry = Registry::default();
    registry.register(metrics);
    Arc::new(RwLock::new(registry))
}
