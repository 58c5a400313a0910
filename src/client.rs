//! Client for the confession board.
//!
//! [`ConfessionsClient`] talks to the HTTP API. [`SyncSession`] builds on it to
//! keep the collection of one user session, falling back to a local cache when
//! the service cannot be reached.

use std::time::Duration;

use chrono::Utc;
use http::StatusCode;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};
use url::Url;

pub use self::storage::{FileStorage, LocalStorage, MemoryStorage};
use crate::{
    http::{CONFESSIONS_PATH, CreateResponse, ListResponse},
    model::{self, Confession, Draft, ValidationError},
};

mod storage;

/// Key the collection is cached under.
pub const CACHE_KEY: &str = "confessions";

/// Entries revealed per page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors talking to the confession service.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ClientError {
    #[snafu(display("invalid service url"))]
    InvalidUrl { source: url::ParseError },
    #[snafu(display("failed to reach the service"))]
    Transport { source: reqwest::Error },
    #[snafu(display("service returned status {status}: {}", message.as_deref().unwrap_or("no details")))]
    Status {
        status: StatusCode,
        message: Option<String>,
    },
    #[snafu(display("unexpected response body"))]
    Decode { source: reqwest::Error },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// HTTP client for the confessions resource.
#[derive(Debug, Clone)]
pub struct ConfessionsClient {
    http_client: reqwest::Client,
    url: Url,
}

impl ConfessionsClient {
    /// Create a client for the service at `base_url`.
    ///
    /// The service may be mounted below a path, `http://host/board` serves the
    /// resource at `http://host/board/api/confessions`.
    pub fn new(base_url: &Url) -> Result<Self, ClientError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base
            .join(CONFESSIONS_PATH.trim_start_matches('/'))
            .context(InvalidUrlSnafu)?;
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context(TransportSnafu)?;
        Ok(Self { http_client, url })
    }

    /// The url of the confessions resource.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch all confessions.
    pub async fn list(&self) -> Result<Vec<Confession>, ClientError> {
        let response = self
            .http_client
            .get(self.url.clone())
            .send()
            .await
            .context(TransportSnafu)?;
        let response = check_status(response).await?;
        let body: ListResponse = response.json().await.context(DecodeSnafu)?;
        Ok(body.confessions)
    }

    /// Post a new confession, returning it as stored by the service.
    pub async fn post(&self, draft: &Draft) -> Result<Confession, ClientError> {
        let response = self
            .http_client
            .post(self.url.clone())
            .json(draft)
            .send()
            .await
            .context(TransportSnafu)?;
        let response = check_status(response).await?;
        let body: CreateResponse = response.json().await.context(DecodeSnafu)?;
        Ok(body.confession)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.message.or(body.error),
        Err(_) => None,
    };
    StatusSnafu { status, message }.fail()
}

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// The operation went through.
    Success,
    /// The operation degraded to local data.
    Warning,
}

/// A short message for the user about the outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Text to show.
    pub message: String,
}

impl Notice {
    fn success(message: &str) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.to_string(),
        }
    }

    fn warning(message: &str) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.to_string(),
        }
    }
}

/// Shown when loading fell back to the cache.
pub const LOAD_FAILED: &str = "Could not load confessions. Using local cache.";
/// Shown when a submit only reached the cache.
pub const SUBMIT_FAILED: &str = "Confession saved locally. Server sync failed.";
/// Shown when a submit reached the service.
pub const SUBMIT_OK: &str = "Your confession has been posted! 🎉";

/// Outcome of [`SyncSession::submit`].
#[derive(Debug, Clone)]
pub struct Submitted {
    /// The entry now at the front of the session's collection.
    pub confession: Confession,
    /// Whether the service stored it. Entries kept only locally are never resent.
    pub delivered: bool,
    /// What to tell the user.
    pub notice: Notice,
}

/// The state of one user session: the collection as last seen and a
/// pagination cursor over it.
///
/// Every change to the collection is mirrored to the local cache, which is
/// what [`Self::load`] falls back to when the service cannot be reached.
#[derive(Debug)]
pub struct SyncSession<S = FileStorage> {
    client: ConfessionsClient,
    storage: S,
    confessions: Vec<Confession>,
    displayed: usize,
    page_size: usize,
}

impl<S: LocalStorage> SyncSession<S> {
    /// Create an empty session. Call [`Self::load`] to populate it.
    pub fn new(client: ConfessionsClient, storage: S) -> Self {
        Self {
            client,
            storage,
            confessions: Vec::new(),
            displayed: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Reveal `page_size` entries per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Replace the collection with the service's, sorted newest first.
    ///
    /// If that fails for any reason the cached collection is used instead and
    /// a warning is returned. The pagination cursor starts over either way.
    pub async fn load(&mut self) -> (Vec<Confession>, Option<Notice>) {
        let notice = match self.client.list().await {
            Ok(mut confessions) => {
                model::sort_newest_first(&mut confessions);
                debug!(len = confessions.len(), "loaded confessions");
                self.confessions = confessions;
                None
            }
            Err(err) => {
                warn!(%err, "failed to load confessions, using local cache");
                self.confessions = self.read_cache();
                Some(Notice::warning(LOAD_FAILED))
            }
        };
        self.reset_pages();
        (self.confessions.clone(), notice)
    }

    /// Post a confession and put it at the front of the collection.
    ///
    /// Blank text is rejected before anything is sent. If the service cannot
    /// take the entry it is created locally instead and only kept in the cache.
    pub async fn submit(&mut self, draft: Draft) -> Result<Submitted, ValidationError> {
        let valid = draft.validate()?;
        let normalized = Draft::new(Some(valid.name()), valid.text());

        let (confession, delivered, notice) = match self.client.post(&normalized).await {
            Ok(confession) => (confession, true, Notice::success(SUBMIT_OK)),
            Err(err) => {
                warn!(%err, "failed to submit confession, saving locally");
                let mut confession = Confession::new(valid, Utc::now());
                model::assign_unique_id(&mut confession, &self.confessions);
                (confession, false, Notice::warning(SUBMIT_FAILED))
            }
        };

        self.confessions.insert(0, confession.clone());
        self.write_cache();
        self.reset_pages();
        Ok(Submitted {
            confession,
            delivered,
            notice,
        })
    }

    /// Reveal the next page and return its entries, empty when nothing is left.
    pub fn next_page(&mut self) -> &[Confession] {
        let start = self.displayed;
        let end = (start + self.page_size).min(self.confessions.len());
        self.displayed = end;
        &self.confessions[start..end]
    }

    /// Whether [`Self::next_page`] has more entries to reveal.
    pub fn has_more(&self) -> bool {
        self.displayed < self.confessions.len()
    }

    /// Hide everything again, so the next page starts at the newest entry.
    pub fn reset_pages(&mut self) {
        self.displayed = 0;
    }

    /// The entries revealed so far.
    pub fn displayed(&self) -> &[Confession] {
        &self.confessions[..self.displayed]
    }

    /// The whole collection.
    pub fn confessions(&self) -> &[Confession] {
        &self.confessions
    }

    /// The cache backing this session.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn read_cache(&self) -> Vec<Confession> {
        let raw = match self.storage.get_item(CACHE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(%err, "failed to read local cache");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(%err, "ignoring corrupt local cache");
            Vec::new()
        })
    }

    fn write_cache(&mut self) {
        let res = serde_json::to_string(&self.confessions)
            .map_err(std::io::Error::from)
            .and_then(|raw| self.storage.set_item(CACHE_KEY, &raw));
        if let Err(err) = res {
            warn!(%err, "failed to write local cache");
        }
    }
}
