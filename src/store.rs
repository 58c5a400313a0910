//! Remote store holding the confession collection.
//!
//! The whole persistent state of the board is one JSON file in a remote,
//! versioned content store. Every write is conditioned on the revision of the
//! file that was read before it, so two writers racing on the same revision
//! cannot silently overwrite each other: the store accepts the first write and
//! rejects the second one as stale.

use std::{future::Future, num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use http::StatusCode;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::{metrics::Metrics, model::Confession};

pub use self::{github::GithubBackend, memory::MemoryBackend};

mod github;
mod memory;

/// Default bound on a single round trip to the remote store.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque token identifying one version of the stored file.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::From, derive_more::Into,
)]
pub struct Revision(String);

impl Revision {
    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A file as read from a [`ContentBackend`].
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Decoded file content.
    pub content: Vec<u8>,
    /// Revision of this content.
    pub revision: Revision,
}

/// A conditional write to a [`ContentBackend`].
#[derive(Debug, Clone)]
pub struct FileUpdate {
    /// New file content.
    pub content: Vec<u8>,
    /// Revision the caller read. `None` means the caller believes the file does not exist.
    pub revision: Option<Revision>,
    /// Human readable description recorded by the store.
    pub message: String,
}

/// Raw access to the single file backing the board.
#[async_trait]
pub trait ContentBackend: std::fmt::Debug + Send + Sync + 'static {
    /// Reads the file, `Ok(None)` if it was never created.
    async fn get_file(&self) -> Result<Option<RemoteFile>, StoreError>;

    /// Writes the file if `update.revision` still matches the current revision.
    async fn put_file(&self, update: FileUpdate) -> Result<(), StoreError>;
}

/// Errors talking to the remote store.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("remote store returned status {status}"))]
    RemoteRead { status: StatusCode },
    #[snafu(display("{message}"))]
    RemoteWrite {
        status: Option<StatusCode>,
        message: String,
        /// The write was rejected because the revision was stale.
        conflict: bool,
    },
    #[snafu(display("stored collection is not valid JSON"))]
    Malformed { source: serde_json::Error },
    #[snafu(display("stored content is not valid base64"))]
    Encoding { source: data_encoding::DecodeError },
    #[snafu(display("failed to reach the remote store"))]
    Transport { source: reqwest::Error },
    #[snafu(display("remote store did not answer within {timeout:?}"))]
    Timeout { timeout: Duration },
}

impl StoreError {
    /// Whether a write was rejected because another write got in first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::RemoteWrite { conflict: true, .. })
    }

    /// Whether the stored content could not be decoded.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            StoreError::Malformed { .. } | StoreError::Encoding { .. }
        )
    }
}

/// Serializes a collection the way it is stored at rest.
pub fn encode_collection(collection: &[Confession]) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(collection).context(MalformedSnafu)
}

/// Parses a stored collection.
pub fn decode_collection(content: &[u8]) -> Result<Vec<Confession>, StoreError> {
    serde_json::from_slice(content).context(MalformedSnafu)
}

/// Client for the confession collection in the remote store.
///
/// Cheap to clone; clones share the backend and the metrics.
#[derive(Debug, Clone)]
pub struct ConfessionStore {
    backend: Arc<dyn ContentBackend>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl ConfessionStore {
    /// Create a store over `backend`.
    pub fn new(backend: impl ContentBackend) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Create a store over a shared backend.
    pub fn from_arc(backend: Arc<dyn ContentBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_TIMEOUT,
            metrics: Default::default(),
        }
    }

    /// Create a store kept in memory.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    /// Set the bound on each remote round trip.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Record store metrics into `metrics`.
    pub fn with_metrics(self, metrics: Arc<Metrics>) -> Self {
        Self { metrics, ..self }
    }

    /// The metrics this store records into.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Fetch the current collection and its revision.
    ///
    /// A file that does not exist yet reads as an empty collection with no revision.
    pub async fn fetch_collection(&self) -> Result<(Vec<Confession>, Option<Revision>), StoreError> {
        let res = self.timed(self.fetch_inner()).await;
        match &res {
            Ok((collection, revision)) => {
                self.metrics.store_reads.inc();
                debug!(len = collection.len(), ?revision, "fetched collection");
            }
            Err(err) => {
                self.metrics.store_read_errors.inc();
                warn!(%err, "failed to fetch collection");
            }
        }
        res
    }

    async fn fetch_inner(&self) -> Result<(Vec<Confession>, Option<Revision>), StoreError> {
        match self.backend.get_file().await? {
            None => Ok((Vec::new(), None)),
            Some(file) => {
                let collection = decode_collection(&file.content)?;
                Ok((collection, Some(file.revision)))
            }
        }
    }

    /// Write `collection`, conditioned on `revision` being the current revision.
    ///
    /// Pass `None` only when the file did not exist at read time.
    pub async fn write_collection(
        &self,
        collection: &[Confession],
        revision: Option<&Revision>,
        message: &str,
    ) -> Result<(), StoreError> {
        let update = FileUpdate {
            content: encode_collection(collection)?,
            revision: revision.cloned(),
            message: message.to_string(),
        };
        let res = self.timed(self.backend.put_file(update)).await;
        match &res {
            Ok(()) => {
                self.metrics.store_writes.inc();
                debug!(len = collection.len(), ?revision, "wrote collection");
            }
            Err(err) if err.is_conflict() => {
                self.metrics.store_write_conflicts.inc();
                debug!(%err, ?revision, "write rejected, stale revision");
            }
            Err(err) => {
                self.metrics.store_write_errors.inc();
                warn!(%err, "failed to write collection");
            }
        }
        res
    }

    /// Fetch, apply `mutate`, and write back conditioned on the fetched revision.
    ///
    /// If the write is rejected because the revision went stale the whole cycle
    /// starts over from a fresh fetch, up to `attempts` cycles in total. Any
    /// other failure is returned immediately. `mutate` runs once per cycle.
    pub async fn read_modify_write<T, F>(
        &self,
        message: &str,
        attempts: NonZeroUsize,
        mut mutate: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(&mut Vec<Confession>) -> T,
    {
        let mut attempt = 1;
        loop {
            let (mut collection, revision) = self.fetch_collection().await?;
            let out = mutate(&mut collection);
            match self
                .write_collection(&collection, revision.as_ref(), message)
                .await
            {
                Ok(()) => return Ok(out),
                Err(err) if err.is_conflict() && attempt < attempts.get() => {
                    debug!(attempt, "retrying with a fresh revision");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_elapsed) => TimeoutSnafu {
                timeout: self.timeout,
            }
            .fail(),
        }
    }
}
