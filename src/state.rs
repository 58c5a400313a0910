//! Shared state for the HTTP handlers

use std::sync::Arc;

use crate::{metrics::Metrics, service::ConfessionService};

/// The shared app state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// List and append operations
    pub service: ConfessionService,
    /// Metrics shared with the store
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Create the state around `service`, recording into the store's metrics.
    pub fn new(service: ConfessionService) -> Self {
        let metrics = service.store().metrics().clone();
        Self { service, metrics }
    }
}
