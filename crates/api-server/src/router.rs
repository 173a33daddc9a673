//! API router — mounts the auction, campaign, tracking, and operational
//! endpoints under /api/v1.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router with all endpoints.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Operational
        .route("/health", get(rest::health_check))
        .route("/metrics", get(rest::metrics_exposition))
        // Auction
        .route("/api/v1/bid-request", post(rest::handle_bid_request))
        // Campaigns
        .route(
            "/api/v1/campaigns",
            get(rest::list_campaigns).post(rest::create_campaign),
        )
        .route(
            "/api/v1/campaigns/{id}",
            get(rest::get_campaign).put(rest::update_campaign),
        )
        .route(
            "/api/v1/campaigns/{id}/performance",
            get(rest::campaign_performance),
        )
        .route("/api/v1/campaigns/{id}/stats", get(rest::campaign_stats))
        .route("/api/v1/campaigns/{id}/metrics", get(rest::campaign_metrics))
        // Tracking
        .route("/api/v1/track/impression", post(rest::track_impression))
        .route("/api/v1/track/click", post(rest::track_click))
        .route("/api/v1/track/conversion", post(rest::track_conversion))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
