//! Configuration for the server

use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::{
    metrics::Metrics,
    store::{ConfessionStore, DEFAULT_TIMEOUT, GithubBackend},
};

/// Environment variable that overrides the configured GitHub token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

const DEFAULT_API_URL: &str = "https://api.github.com";

const DEFAULT_METRICS_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9117);

/// Server configuration
///
/// The config is usually loaded from a file with [`Self::load`].
///
/// The struct also implements [`Default`] which creates a config suitable for local development
/// and testing: the HTTP server on port 8080 and the collection kept in memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Config for the HTTP server
    pub http: HttpConfig,
    /// Config for the remote store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Config for the metrics server.
    ///
    /// The metrics server is started by default. To disable the metrics server, set to
    /// `Some(MetricsConfig::disabled())`.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

/// The config for the metrics server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    /// Set to true to disable the metrics server.
    #[serde(default)]
    pub disabled: bool,
    /// Optionally set a custom address to bind to.
    pub bind_addr: Option<SocketAddr>,
}

impl MetricsConfig {
    /// Disable the metrics server.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            bind_addr: None,
        }
    }
}

/// Config for the HTTP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Port to bind to
    pub port: u16,
    /// Optionally set a custom bind address (will use 0.0.0.0 if unset)
    pub bind_addr: Option<IpAddr>,
}

impl HttpConfig {
    /// The socket address to listen on.
    pub fn socket_addr(&self) -> SocketAddr {
        let bind_addr = self
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(bind_addr, self.port)
    }
}

/// Config for the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// The GitHub repository holding the collection.
    ///
    /// If set to `None` the collection is kept in memory and lost on restart.
    pub github: Option<GithubConfig>,
    /// Bound on a single round trip to the store.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// How many read-modify-write cycles an append may take when racing other writers.
    ///
    /// `1` surfaces the first stale-revision rejection as an error.
    pub write_attempts: NonZeroUsize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            github: None,
            timeout: DEFAULT_TIMEOUT,
            write_attempts: NonZeroUsize::MIN,
        }
    }
}

impl StoreConfig {
    /// Build the store described by this config.
    pub fn build(&self, metrics: Arc<Metrics>) -> Result<ConfessionStore> {
        let store = match &self.github {
            Some(github) => {
                let backend = GithubBackend::new(github)?;
                info!(url = %backend.contents_url(), branch = %github.branch, "using GitHub store");
                if github.token.is_none() {
                    warn!("no GitHub token configured, writes will be rejected");
                }
                ConfessionStore::new(backend)
            }
            None => {
                warn!("no remote store configured, keeping confessions in memory");
                ConfessionStore::in_memory()
            }
        };
        Ok(store.with_timeout(self.timeout).with_metrics(metrics))
    }
}

/// Location of the collection file in a GitHub repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GithubConfig {
    /// Base url of the API.
    pub api_url: Url,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Path of the file inside the repository.
    pub path: String,
    /// Branch to read from and commit to.
    pub branch: String,
    /// Access token. Overridden by the `GITHUB_TOKEN` environment variable, see
    /// [`Config::load`].
    pub token: Option<String>,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("valid url"),
            owner: String::new(),
            repo: String::new(),
            path: "data/confessions.json".to_string(),
            branch: "main".to_string(),
            token: None,
            user_agent: "confession-board".to_string(),
        }
    }
}

impl Config {
    /// Load the config from a file.
    ///
    /// A non-empty `GITHUB_TOKEN` in the environment replaces the token from the file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        let mut config: Config = toml::from_str(&s)?;
        if let Some(github) = config.store.github.as_mut() {
            if let Some(token) = env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()) {
                github.token = Some(token);
            }
        }
        Ok(config)
    }

    /// The address to serve metrics on, or `None` if the metrics server is disabled.
    pub(crate) fn metrics_addr(&self) -> Option<SocketAddr> {
        match &self.metrics {
            None => Some(DEFAULT_METRICS_ADDR),
            Some(conf) => match conf.disabled {
                true => None,
                false => Some(conf.bind_addr.unwrap_or(DEFAULT_METRICS_ADDR)),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                port: 8080,
                bind_addr: None,
            },
            store: StoreConfig::default(),
            metrics: None,
        }
    }
}
