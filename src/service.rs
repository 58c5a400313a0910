//! Listing and appending confessions.

use std::num::NonZeroUsize;

use chrono::Utc;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    model::{self, Confession, Draft, ValidationError},
    store::{ConfessionStore, StoreError},
};

/// Errors of the confession service, per operation.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ServiceError {
    #[snafu(transparent)]
    Validation { source: ValidationError },
    #[snafu(display("Failed to fetch confessions"))]
    Retrieve { source: StoreError },
    #[snafu(display("Failed to add confession"))]
    Append { source: StoreError },
}

/// The board's operations on top of a [`ConfessionStore`].
#[derive(Debug, Clone)]
pub struct ConfessionService {
    store: ConfessionStore,
    write_attempts: NonZeroUsize,
}

impl ConfessionService {
    /// Create a service that gives up on the first stale-revision rejection.
    pub fn new(store: ConfessionStore) -> Self {
        Self {
            store,
            write_attempts: NonZeroUsize::MIN,
        }
    }

    /// Allow up to `attempts` read-modify-write cycles per append.
    pub fn with_write_attempts(self, attempts: NonZeroUsize) -> Self {
        Self {
            write_attempts: attempts,
            ..self
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &ConfessionStore {
        &self.store
    }

    /// All confessions in stored order, newest first.
    pub async fn list(&self) -> Result<Vec<Confession>, ServiceError> {
        let (collection, _revision) = self.store.fetch_collection().await.context(RetrieveSnafu)?;
        Ok(collection)
    }

    /// Validate `draft` and prepend it to the stored collection.
    ///
    /// Nothing is written if validation fails.
    pub async fn append(&self, draft: Draft) -> Result<Confession, ServiceError> {
        let metrics = self.store.metrics();
        let valid = match draft.validate() {
            Ok(valid) => valid,
            Err(err) => {
                metrics.confessions_rejected.inc();
                debug!(%err, "rejected draft");
                return Err(err.into());
            }
        };

        let message = format!("Add confession from {}", valid.name());
        let confession = Confession::new(valid, Utc::now());
        let confession = self
            .store
            .read_modify_write(&message, self.write_attempts, |collection| {
                let mut fresh = confession.clone();
                model::assign_unique_id(&mut fresh, collection);
                collection.insert(0, fresh.clone());
                fresh
            })
            .await
            .context(AppendSnafu)?;

        metrics.confessions_appended.inc();
        info!(id = confession.id, name = %confession.name, "added confession");
        Ok(confession)
    }
}
