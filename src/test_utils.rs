//! Internal utilities to support testing.

use tokio::sync::oneshot;

/// A drop guard to clean up test infrastructure.
///
/// After dropping the test infrastructure will asynchronously shutdown and release its
/// resources.
#[derive(Debug)]
#[allow(dead_code)]
pub struct CleanupDropGuard(pub(crate) oneshot::Sender<()>);

/// A fake of the GitHub repository contents API holding a single file.
pub(crate) mod contents_api {
    use std::{
        collections::HashMap,
        future::IntoFuture,
        net::{Ipv4Addr, SocketAddr},
        sync::{Arc, Mutex},
    };

    use axum::{
        Json, Router,
        extract::{Query, State},
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    };
    use data_encoding::BASE64;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::sync::oneshot;
    use tracing::{debug, error};
    use url::Url;

    use super::CleanupDropGuard;

    #[derive(Debug, Default)]
    struct Inner {
        content: Option<(Vec<u8>, String)>,
        next_sha: u64,
        messages: Vec<String>,
    }

    impl Inner {
        fn store(&mut self, content: Vec<u8>) -> String {
            self.next_sha += 1;
            let sha = format!("{:040x}", self.next_sha);
            self.content = Some((content, sha.clone()));
            sha
        }
    }

    /// Repository state shared between the test and the fake server.
    #[derive(Debug, Clone)]
    pub struct FakeRepo {
        token: String,
        branch: String,
        inner: Arc<Mutex<Inner>>,
    }

    impl FakeRepo {
        pub fn new(token: &str, branch: &str) -> Self {
            Self {
                token: token.to_string(),
                branch: branch.to_string(),
                inner: Default::default(),
            }
        }

        /// Overwrite the file as if committed by someone else.
        pub fn set_content(&self, content: Vec<u8>) {
            self.inner.lock().expect("poisoned").store(content);
        }

        pub fn raw_content(&self) -> Option<Vec<u8>> {
            let inner = self.inner.lock().expect("poisoned");
            inner.content.as_ref().map(|(c, _)| c.clone())
        }

        /// Commit messages of accepted writes.
        pub fn messages(&self) -> Vec<String> {
            self.inner.lock().expect("poisoned").messages.clone()
        }
    }

    pub async fn run(repo: FakeRepo) -> std::io::Result<(Url, CleanupDropGuard)> {
        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let app = Router::new()
            .route(
                "/repos/{owner}/{repo}/contents/{*path}",
                get(get_contents).put(put_contents),
            )
            .with_state(repo);
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        let bound_addr = listener.local_addr()?;
        let url: Url = format!("http://{bound_addr}")
            .parse()
            .expect("valid url");

        let (tx, mut rx) = oneshot::channel();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app);
            tokio::select! {
                _ = &mut rx => {
                    debug!("shutting down contents api");
                }
                res = serve.into_future() => {
                    if let Err(e) = res {
                        error!("contents api error: {e:?}");
                    }
                }
            }
        });
        Ok((url, CleanupDropGuard(tx)))
    }

    fn error(status: StatusCode, message: &str) -> Response {
        (status, Json(json!({ "message": message }))).into_response()
    }

    fn check_headers(repo: &FakeRepo, headers: &HeaderMap) -> Result<(), Response> {
        let value = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
        if value(header::USER_AGENT).is_none() {
            return Err(error(StatusCode::FORBIDDEN, "User-Agent required"));
        }
        if value(header::ACCEPT) != Some("application/vnd.github.v3+json") {
            return Err(error(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported media type"));
        }
        let expected = format!("token {}", repo.token);
        if value(header::AUTHORIZATION) != Some(expected.as_str()) {
            return Err(error(StatusCode::UNAUTHORIZED, "Bad credentials"));
        }
        Ok(())
    }

    async fn get_contents(
        State(repo): State<FakeRepo>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Response {
        if let Err(response) = check_headers(&repo, &headers) {
            return response;
        }
        if query.get("ref") != Some(&repo.branch) {
            return error(StatusCode::NOT_FOUND, "No commit found for the ref");
        }
        let inner = repo.inner.lock().expect("poisoned");
        let Some((content, sha)) = inner.content.as_ref() else {
            return error(StatusCode::NOT_FOUND, "Not Found");
        };
        // the real API wraps the base64 payload at 60 columns
        let encoded = BASE64.encode(content);
        let mut wrapped = encoded
            .as_bytes()
            .chunks(60)
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect::<Vec<_>>()
            .join("\n");
        wrapped.push('\n');
        Json(json!({
            "type": "file",
            "encoding": "base64",
            "content": wrapped,
            "sha": sha,
        }))
        .into_response()
    }

    #[derive(Debug, Deserialize)]
    struct PutBody {
        message: String,
        content: String,
        branch: String,
        sha: Option<String>,
    }

    async fn put_contents(
        State(repo): State<FakeRepo>,
        headers: HeaderMap,
        Json(body): Json<PutBody>,
    ) -> Response {
        if let Err(response) = check_headers(&repo, &headers) {
            return response;
        }
        if body.branch != repo.branch {
            return error(StatusCode::NOT_FOUND, "Branch not found");
        }
        let Ok(content) = BASE64.decode(body.content.as_bytes()) else {
            return error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "content is not valid Base64",
            );
        };

        let mut inner = repo.inner.lock().expect("poisoned");
        let current = inner.content.as_ref().map(|(_, sha)| sha.clone());
        match (current, body.sha) {
            (Some(_), None) => {
                return error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Invalid request.\n\n\"sha\" wasn't supplied.",
                );
            }
            (Some(current), Some(sha)) if current != sha => {
                return error(
                    StatusCode::CONFLICT,
                    &format!("data/confessions.json does not match {sha}"),
                );
            }
            (None, Some(_)) => {
                return error(StatusCode::CONFLICT, "file does not exist");
            }
            _ => {}
        }

        let created = inner.content.is_none();
        let sha = inner.store(content);
        inner.messages.push(body.message);
        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        (
            status,
            Json(json!({
                "content": { "sha": sha },
                "commit": { "message": inner.messages.last() },
            })),
        )
            .into_response()
    }
}
