//! Axum REST handlers. Auction failures never surface as request errors;
//! tracking surfaces validation and budget refusals to the caller.

use crate::models::*;
use adserve_auction::AuctionEngine;
use adserve_cache::RedisStore;
use adserve_campaigns::CampaignService;
use adserve_core::config::ServerConfig;
use adserve_core::error::AdServeError;
use adserve_core::openrtb::{BidRequest, BidResponse};
use adserve_core::types::{Campaign, CampaignMetrics, CampaignStatus, TrackingEvent};
use adserve_tracking::TrackingService;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{Duration, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use uuid::Uuid;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub auction: Arc<AuctionEngine>,
    pub campaigns: Arc<CampaignService>,
    pub tracking: Arc<TrackingService>,
    pub cache: Arc<RedisStore>,
    pub limits: ServerConfig,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    pub start_time: Instant,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn map_error(err: AdServeError) -> ApiError {
    match err {
        AdServeError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        AdServeError::NotFound(msg) => api_error(StatusCode::NOT_FOUND, msg),
        AdServeError::Throttled(msg) => api_error(StatusCode::TOO_MANY_REQUESTS, msg),
        AdServeError::BudgetExceeded(msg) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("budget exceeded: {msg}"))
        }
        other => {
            error!(error = %other, "Request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Endpoint-scoped rate limit backed by the fast store; 429 when exhausted.
async fn enforce_rate_limit(state: &AppState, endpoint: &str, limit: u32) -> Result<(), ApiError> {
    match state
        .cache
        .check_rate_limit(endpoint, limit, std::time::Duration::from_secs(1))
        .await
    {
        Ok(true) => Ok(()),
        Ok(false) => {
            metrics::counter!("api.rate_limited").increment(1);
            Err(map_error(AdServeError::Throttled(format!(
                "{endpoint} exceeded {limit}/s"
            ))))
        }
        // Limiter unreachable: fail open.
        Err(e) => {
            error!(error = %e, endpoint = endpoint, "Rate limiter unavailable");
            Ok(())
        }
    }
}

// ─── Auction ───────────────────────────────────────────────────────────────

/// POST /api/v1/bid-request — OpenRTB bid endpoint.
pub async fn handle_bid_request(
    State(state): State<AppState>,
    Json(mut request): Json<BidRequest>,
) -> Result<Json<BidResponse>, ApiError> {
    enforce_rate_limit(&state, "bid-request", state.limits.bid_request_rps).await?;

    if request.id.is_empty() {
        request.id = Uuid::new_v4().to_string();
    }

    let response = state.auction.run_auction(Arc::new(request)).await;
    Ok(Json(response))
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let now = Utc::now();
    let campaign = Campaign {
        id: Uuid::nil(),
        name: req.name,
        advertiser_id: req.advertiser_id,
        status: CampaignStatus::Draft,
        budget_daily: req.budget_daily,
        budget_total: req.budget_total,
        spent_daily: 0.0,
        spent_total: 0.0,
        bid_type: req.bid_type,
        bid_amount: req.bid_amount,
        targeting_rules: req.targeting_rules,
        frequency_capping: req.frequency_capping,
        start_date: req.start_date,
        end_date: req.end_date,
        created_at: now,
        updated_at: now,
    };

    let created = state.campaigns.create(campaign).await.map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state.campaigns.get(id).await.map(Json).map_err(map_error)
}

pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCampaignRequest>,
) -> Result<Json<Campaign>, ApiError> {
    let mut campaign = state.campaigns.get(id).await.map_err(map_error)?;

    if let Some(name) = req.name {
        campaign.name = name;
    }
    if let Some(status) = req.status {
        campaign.status = status;
    }
    if let Some(budget_daily) = req.budget_daily {
        campaign.budget_daily = budget_daily;
    }
    if let Some(budget_total) = req.budget_total {
        campaign.budget_total = budget_total;
    }
    if let Some(bid_type) = req.bid_type {
        campaign.bid_type = bid_type;
    }
    if let Some(bid_amount) = req.bid_amount {
        campaign.bid_amount = bid_amount;
    }
    if let Some(targeting) = req.targeting_rules {
        campaign.targeting_rules = Some(targeting);
    }
    if let Some(capping) = req.frequency_capping {
        campaign.frequency_capping = Some(capping);
    }
    if let Some(end_date) = req.end_date {
        campaign.end_date = Some(end_date);
    }

    let updated = state.campaigns.update(campaign).await.map_err(map_error)?;
    Ok(Json(updated))
}

/// GET /api/v1/campaigns — campaigns currently serveable.
pub async fn list_campaigns(
    State(state): State<AppState>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    state
        .campaigns
        .list_active(Utc::now())
        .await
        .map(Json)
        .map_err(map_error)
}

pub async fn campaign_performance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Json<CampaignMetrics>, ApiError> {
    let date = query
        .date
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());

    state
        .campaigns
        .metrics(id, &date)
        .await
        .map(Json)
        .map_err(map_error)
}

pub async fn campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<std::collections::HashMap<String, i64>>, ApiError> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or_else(|| end - Duration::hours(24));

    state
        .tracking
        .event_stats(id, start, end)
        .await
        .map(Json)
        .map_err(map_error)
}

pub async fn campaign_metrics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignMetrics>, ApiError> {
    state
        .tracking
        .real_time_metrics(id)
        .await
        .map(Json)
        .map_err(map_error)
}

// ─── Tracking ──────────────────────────────────────────────────────────────

fn client_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn header_string(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn build_event(req: TrackRequest, headers: &HeaderMap, addr: &SocketAddr) -> TrackingEvent {
    TrackingEvent {
        id: Uuid::nil(),
        event_type: adserve_core::types::TrackingEventType::Impression,
        campaign_id: req.campaign_id,
        creative_id: req
            .creative_id
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok()),
        user_id: req.user_id,
        session_id: req.session_id,
        ip: client_ip(headers, addr),
        user_agent: header_string(headers, "user-agent"),
        referrer: header_string(headers, "referer"),
        price: req.value,
        timestamp: Utc::now(),
        processed_at: None,
        metadata: serde_json::Value::Null,
    }
}

pub async fn track_impression(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TrackRequest>,
) -> Result<Json<TrackResponse>, ApiError> {
    enforce_rate_limit(&state, "track-impression", state.limits.impression_rps).await?;

    let event = build_event(req, &headers, &addr);
    let tracked = state
        .tracking
        .track_impression(event)
        .await
        .map_err(map_error)?;

    Ok(Json(TrackResponse {
        status: "success",
        event_id: tracked.id,
    }))
}

pub async fn track_click(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TrackRequest>,
) -> Result<Json<TrackResponse>, ApiError> {
    enforce_rate_limit(&state, "track-click", state.limits.click_rps).await?;

    let event = build_event(req, &headers, &addr);
    let tracked = state.tracking.track_click(event).await.map_err(map_error)?;

    Ok(Json(TrackResponse {
        status: "success",
        event_id: tracked.id,
    }))
}

pub async fn track_conversion(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TrackRequest>,
) -> Result<Json<TrackResponse>, ApiError> {
    enforce_rate_limit(&state, "track-conversion", state.limits.conversion_rps).await?;

    let event = build_event(req, &headers, &addr);
    let tracked = state
        .tracking
        .track_conversion(event)
        .await
        .map_err(map_error)?;

    Ok(Json(TrackResponse {
        status: "success",
        event_id: tracked.id,
    }))
}

// ─── Operational ───────────────────────────────────────────────────────────

/// GET /health — liveness for load balancers.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        time: Utc::now().timestamp(),
    })
}

/// GET /metrics — Prometheus text exposition.
pub async fn metrics_exposition(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
