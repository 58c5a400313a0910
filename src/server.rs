//! The main server which wires the store, the service and the HTTP server together.

use std::sync::Arc;

use anyhow::Result;
use iroh_metrics::service::start_metrics_server;
use tracing::{Instrument, debug, info_span, info};

use crate::{
    config::Config,
    http::HttpServer,
    metrics::{self, Metrics},
    service::ConfessionService,
    state::AppState,
    store::ConfessionStore,
};

/// Spawn the server and run until the `Ctrl-C` signal is received, then shutdown.
pub async fn run_with_config_until_ctrl_c(config: Config) -> Result<()> {
    let store = config.store.build(Arc::new(Metrics::default()))?;
    let server = Server::spawn(config, store).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown");
    server.shutdown().await?;
    Ok(())
}

/// The confession board server.
#[derive(Debug)]
pub struct Server {
    http_server: HttpServer,
    metrics_task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Server {
    /// Spawn the server.
    ///
    /// Serves the HTTP API from a background task until [`Self::shutdown`] is called. The
    /// store's metrics are served in the OpenMetrics format from a second task, unless
    /// `config.metrics` disables it.
    pub async fn spawn(config: Config, store: ConfessionStore) -> Result<Self> {
        let metrics_addr = config.metrics_addr();
        let registry = metrics::registry(store.metrics().clone());
        let metrics_task = tokio::task::spawn(
            async move {
                if let Some(addr) = metrics_addr {
                    debug!(%addr, "starting metrics server");
                    start_metrics_server(addr, registry).await?;
                }
                anyhow::Ok(())
            }
            .instrument(info_span!("metrics-server")),
        );

        let service = ConfessionService::new(store).with_write_attempts(config.store.write_attempts);
        let state = AppState::new(service);
        let http_server = HttpServer::spawn(config.http, state).await?;
        Ok(Self {
            http_server,
            metrics_task,
        })
    }

    /// The address the HTTP server is bound to.
    pub fn http_addr(&self) -> std::net::SocketAddr {
        self.http_server.http_addr()
    }

    /// Stop the server and wait for in-flight requests to complete.
    pub async fn shutdown(self) -> Result<()> {
        self.metrics_task.abort();
        self.http_server.shutdown().await
    }

    /// Wait for all tasks to complete.
    ///
    /// This will run forever unless the HTTP server fails.
    pub async fn run_until_error(self) -> Result<()> {
        let res = self.http_server.run_until_done().await;
        self.metrics_task.abort();
        res
    }

    /// Spawn a server on localhost with an ephemeral port, suitable for testing.
    ///
    /// It returns the server handle and the [`Url`](url::Url) of the HTTP server.
    #[cfg(test)]
    pub async fn spawn_for_tests(store: ConfessionStore) -> Result<(Self, url::Url)> {
        use std::net::{IpAddr, Ipv4Addr};

        use crate::config::{HttpConfig, MetricsConfig};

        let config = Config {
            http: HttpConfig {
                port: 0,
                bind_addr: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            },
            metrics: Some(MetricsConfig::disabled()),
            ..Default::default()
        };
        let server = Self::spawn(config, store).await?;
        let http_url = format!("http://{}", server.http_addr()).parse()?;
        Ok((server, http_url))
    }
}
