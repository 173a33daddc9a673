//! AdServe — low-latency real-time ad auction and delivery service.
//!
//! Main entry point that wires the stores, services, and schedulers and
//! starts the HTTP server.

use adserve_api::rest::AppState;
use adserve_api::server::install_metrics_recorder;
use adserve_api::ApiServer;
use adserve_auction::AuctionEngine;
use adserve_bus::NatsBus;
use adserve_cache::RedisStore;
use adserve_campaigns::CampaignService;
use adserve_core::config::AppConfig;
use adserve_core::event_bus::{noop_bus, EventBus};
use adserve_store::{run_migrations, CampaignStore, EventStore};
use adserve_tracking::TrackingService;
use chrono::Utc;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "adserve")]
#[command(about = "Low-latency real-time ad auction and delivery service")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "ADSERVE__SERVER__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics exposition port (overrides config)
    #[arg(long, env = "ADSERVE__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Log filter level, e.g. debug (overrides RUST_LOG)
    #[arg(long, env = "ADSERVE__LOG_LEVEL")]
    log_level: Option<String>,

    /// Postgres connection URL (overrides config)
    #[arg(long, env = "ADSERVE__DATABASE__URL")]
    database_url: Option<String>,

    /// Redis connection URL (overrides config)
    #[arg(long, env = "ADSERVE__REDIS__URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; --log-level sets the default filter, RUST_LOG
    // still wins when present.
    let default_filter = match &cli.log_level {
        Some(level) => format!("adserve={level},tower_http={level}"),
        None => "adserve=info,tower_http=info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_filter)),
        )
        .json()
        .init();

    info!("AdServe starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.server.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(url) = cli.redis_url {
        config.redis.url = url;
    }

    info!(
        http_port = config.server.http_port,
        metrics_port = config.metrics.port,
        auction_timeout_ms = config.auction.timeout_ms,
        "Configuration loaded"
    );

    // Process-wide metric registrations, installed exactly once.
    let metrics_handle = install_metrics_recorder()?;

    // Durable store
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_millis(config.database.connect_timeout_ms))
        .connect(&config.database.url)
        .await?;
    run_migrations(&pool).await?;

    let campaign_store = Arc::new(CampaignStore::new(pool.clone()));
    let event_store = Arc::new(EventStore::new(pool.clone()));

    // Fast store
    let cache = Arc::new(RedisStore::new(&config.redis).await?);

    // Event bus; the service keeps running without a broker.
    let bus: Arc<dyn EventBus> = match NatsBus::connect(&config.nats).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            warn!(error = %e, "NATS unavailable, event publishing disabled");
            noop_bus()
        }
    };

    // Services
    let campaigns = Arc::new(CampaignService::new(
        campaign_store,
        cache.clone(),
        bus.clone(),
    ));
    let tracking = Arc::new(TrackingService::new(
        event_store,
        cache.clone(),
        campaigns.clone(),
        bus.clone(),
        &config.tracking,
    ));
    tracking.start();

    let auction = Arc::new(AuctionEngine::new(
        campaigns.clone(),
        cache.clone(),
        bus.clone(),
        &config.auction,
    ));

    // Daily budget reset at every UTC midnight.
    let campaigns_for_reset = campaigns.clone();
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next_midnight = (now + chrono::Duration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight is a valid time")
                .and_utc();
            let until = (next_midnight - now)
                .to_std()
                .unwrap_or(Duration::from_secs(24 * 3600));

            tokio::time::sleep(until).await;

            info!("Resetting daily campaign budgets");
            if let Err(e) = campaigns_for_reset.reset_daily_budgets(Utc::now()).await {
                error!(error = %e, "Failed to reset daily budgets");
            }
        }
    });

    let state = AppState {
        auction,
        campaigns,
        tracking: tracking.clone(),
        cache,
        limits: config.server.clone(),
        metrics_handle,
        start_time: Instant::now(),
    };

    let server = ApiServer::new(config.server.clone(), config.metrics.clone(), state);

    if let Err(e) = server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("AdServe is ready to serve traffic");

    // Blocks until SIGINT/SIGTERM, then drains connections.
    server.start_http(shutdown_signal()).await?;

    info!("Shutting down, flushing tracking buffer");
    tracking.stop().await;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
