//! Content backend for the GitHub repository contents API.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use data_encoding::BASE64;
use http::{
    Method, StatusCode,
    header::{ACCEPT, AUTHORIZATION},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::debug;
use url::Url;

use super::{
    ContentBackend, EncodingSnafu, FileUpdate, MalformedSnafu, RemoteFile, RemoteReadSnafu,
    RemoteWriteSnafu, Revision, StoreError, TransportSnafu,
};
use crate::config::GithubConfig;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const DEFAULT_WRITE_ERROR: &str = "Failed to update remote store";

/// A [`ContentBackend`] reading and writing one file in a GitHub repository.
///
/// Addresses `{api_url}/repos/{owner}/{repo}/contents/{path}` on `branch`. The
/// file's blob `sha` is used as the [`Revision`].
#[derive(derive_more::Debug, Clone)]
pub struct GithubBackend {
    http_client: reqwest::Client,
    contents_url: Url,
    branch: String,
    #[debug(skip)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
}

impl GithubBackend {
    /// Creates a new backend from its config.
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let mut contents_url = config.api_url.clone();
        contents_url
            .path_segments_mut()
            .map_err(|_| anyhow!("invalid GitHub API url: {}", config.api_url))?
            .pop_if_empty()
            .extend(["repos", &config.owner, &config.repo, "contents"])
            .extend(config.path.split('/').filter(|s| !s.is_empty()));
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| anyhow!("failed to build http client: {err}"))?;
        Ok(Self {
            http_client,
            contents_url,
            branch: config.branch.clone(),
            token: config.token.clone(),
        })
    }

    /// The url of the file in the contents API.
    pub fn contents_url(&self) -> &Url {
        &self.contents_url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let request = self
            .http_client
            .request(method, url)
            .header(ACCEPT, GITHUB_ACCEPT);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("token {token}")),
            None => request,
        }
    }
}

#[async_trait]
impl ContentBackend for GithubBackend {
    async fn get_file(&self) -> Result<Option<RemoteFile>, StoreError> {
        let mut url = self.contents_url.clone();
        url.query_pairs_mut().append_pair("ref", &self.branch);

        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .context(TransportSnafu)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %self.contents_url, "file does not exist yet");
            return Ok(None);
        }
        if !status.is_success() {
            return RemoteReadSnafu { status }.fail();
        }

        let body = response.bytes().await.context(TransportSnafu)?;
        let contents: ContentsResponse = serde_json::from_slice(&body).context(MalformedSnafu)?;
        Ok(Some(RemoteFile {
            content: decode_base64(&contents.content)?,
            revision: Revision::from(contents.sha),
        }))
    }

    async fn put_file(&self, update: FileUpdate) -> Result<(), StoreError> {
        let payload = PutRequest {
            message: &update.message,
            content: BASE64.encode(&update.content),
            branch: &self.branch,
            sha: update.revision.as_ref().map(Revision::as_str),
        };

        let response = self
            .request(Method::PUT, self.contents_url.clone())
            .json(&payload)
            .send()
            .await
            .context(TransportSnafu)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .unwrap_or_default()
            .message
            .unwrap_or_else(|| DEFAULT_WRITE_ERROR.to_string());
        RemoteWriteSnafu {
            status: Some(status),
            conflict: is_stale_revision(status, &message),
            message,
        }
        .fail()
    }
}

/// GitHub wraps base64 content at 60 columns.
fn decode_base64(content: &str) -> Result<Vec<u8>, StoreError> {
    let cleaned: String = content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    BASE64.decode(cleaned.as_bytes()).context(EncodingSnafu)
}

/// `409` means the `sha` did not match. `422` about the `sha` means the file
/// was created after we saw it missing.
fn is_stale_revision(status: StatusCode, message: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::UNPROCESSABLE_ENTITY && message.contains("sha"))
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        model::{Confession, Draft},
        store::ConfessionStore,
        test_utils::contents_api::{self, FakeRepo},
    };

    fn config(api_url: Url) -> GithubConfig {
        GithubConfig {
            api_url,
            owner: "someone".to_string(),
            repo: "board".to_string(),
            path: "data/confessions.json".to_string(),
            branch: "main".to_string(),
            token: Some("secret".to_string()),
            ..Default::default()
        }
    }

    fn confession(text: &str) -> Confession {
        Confession::new(
            Draft::new(Some("tester"), text).validate().unwrap(),
            chrono::Utc::now(),
        )
    }

    #[test]
    fn decodes_wrapped_base64() {
        let encoded = BASE64.encode(b"[{\"long\": \"enough to wrap over a line\"}]");
        let wrapped = encoded
            .as_bytes()
            .chunks(16)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(
            decode_base64(&wrapped).unwrap(),
            b"[{\"long\": \"enough to wrap over a line\"}]"
        );
        assert!(decode_base64("!!not base64!!").is_err());
    }

    #[test]
    fn stale_revision_classification() {
        assert!(is_stale_revision(StatusCode::CONFLICT, "anything"));
        assert!(is_stale_revision(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid request.\n\n\"sha\" wasn't supplied."
        ));
        assert!(!is_stale_revision(
            StatusCode::UNPROCESSABLE_ENTITY,
            "content is not valid Base64"
        ));
        assert!(!is_stale_revision(StatusCode::UNAUTHORIZED, "Bad credentials"));
    }

    #[test]
    fn contents_url_layout() -> TestResult {
        let backend = GithubBackend::new(&config("https://api.github.com".parse()?))?;
        assert_eq!(
            backend.contents_url().as_str(),
            "https://api.github.com/repos/someone/board/contents/data/confessions.json"
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn bootstrap_then_round_trip() -> TestResult {
        let repo = FakeRepo::new("secret", "main");
        let (url, _guard) = contents_api::run(repo.clone()).await?;
        let store = ConfessionStore::new(GithubBackend::new(&config(url))?);

        let (collection, revision) = store.fetch_collection().await?;
        assert!(collection.is_empty());
        assert!(revision.is_none());

        let written = vec![confession("hello"), confession("older")];
        store.write_collection(&written, None, "Add confession from tester").await?;

        let (read, revision) = store.fetch_collection().await?;
        assert_eq!(read, written);
        assert!(revision.is_some());

        assert_eq!(repo.messages(), vec!["Add confession from tester"]);
        let stored: Vec<Confession> = serde_json::from_slice(&repo.raw_content().unwrap())?;
        assert_eq!(stored, written);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn conflicting_writes_are_classified() -> TestResult {
        let repo = FakeRepo::new("secret", "main");
        let (url, _guard) = contents_api::run(repo.clone()).await?;
        let store = ConfessionStore::new(GithubBackend::new(&config(url))?);

        store.write_collection(&[confession("a")], None, "a").await?;
        let (_, stale) = store.fetch_collection().await?;
        store
            .write_collection(&[confession("b")], stale.as_ref(), "b")
            .await?;

        // same revision again: 409
        let err = store
            .write_collection(&[confession("c")], stale.as_ref(), "c")
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err:?}");

        // no revision although the file exists: 422
        let err = store
            .write_collection(&[confession("d")], None, "d")
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err:?}");

        assert_eq!(repo.messages(), vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn bad_credentials() -> TestResult {
        let repo = FakeRepo::new("secret", "main");
        let (url, _guard) = contents_api::run(repo.clone()).await?;
        let mut config = config(url);
        config.token = Some("wrong".to_string());
        let store = ConfessionStore::new(GithubBackend::new(&config)?);

        let err = store.fetch_collection().await.unwrap_err();
        assert!(
            matches!(err, StoreError::RemoteRead { status } if status == StatusCode::UNAUTHORIZED),
            "{err:?}"
        );

        let err = store.write_collection(&[], None, "x").await.unwrap_err();
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "Bad credentials");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn wrong_branch_reads_as_missing() -> TestResult {
        let repo = FakeRepo::new("secret", "main");
        let (url, _guard) = contents_api::run(repo.clone()).await?;
        let main = ConfessionStore::new(GithubBackend::new(&config(url.clone()))?);
        main.write_collection(&[confession("on main")], None, "x")
            .await?;

        let mut other = config(url);
        other.branch = "dev".to_string();
        let dev = ConfessionStore::new(GithubBackend::new(&other)?);
        let (collection, revision) = dev.fetch_collection().await?;
        assert!(collection.is_empty());
        assert!(revision.is_none());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unreachable_api_is_a_transport_error() -> TestResult {
        // bind and drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);
        let url: Url = format!("http://{addr}").parse()?;
        let store = ConfessionStore::new(GithubBackend::new(&config(url))?);
        let err = store.fetch_collection().await.unwrap_err();
        assert!(matches!(err, StoreError::Transport { .. }), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn undecodable_content_is_malformed() -> TestResult {
        let repo = FakeRepo::new("secret", "main");
        repo.set_content(b"definitely not json".to_vec());
        let (url, _guard) = contents_api::run(repo.clone()).await?;
        let store = ConfessionStore::new(GithubBackend::new(&config(url))?);
        let err = store.fetch_collection().await.unwrap_err();
        assert!(err.is_malformed(), "{err:?}");
        Ok(())
    }
}
