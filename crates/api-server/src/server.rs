//! HTTP server lifecycle and Prometheus recorder installation.

use crate::rest::AppState;
use crate::router::api_router;
use adserve_core::config::{MetricsConfig, ServerConfig};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tracing::{error, info};

/// Install the process-wide Prometheus recorder. Must run exactly once,
/// before any counter or histogram is touched.
pub fn install_metrics_recorder(
) -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus recorder installed");
    Ok(handle)
}

/// Main API server for the REST surface.
pub struct ApiServer {
    config: ServerConfig,
    metrics: MetricsConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ServerConfig, metrics: MetricsConfig, state: AppState) -> Self {
        Self {
            config,
            metrics,
            state,
        }
    }

    /// Start the HTTP server; resolves when `shutdown` completes and all
    /// in-flight connections drain.
    pub async fn start_http(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let app = api_router(self.state.clone());

        let addr = SocketAddr::new(self.config.host.parse()?, self.config.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        Ok(())
    }

    /// Start the metrics exposition server on its dedicated port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let handle = self.state.metrics_handle.clone();
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );

        let addr = SocketAddr::new(self.config.host.parse()?, self.metrics.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(port = self.metrics.port, "Metrics exporter started");

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server failed");
            }
        });

        Ok(())
    }
}
