//! API request/response types for the management and tracking endpoints.

use adserve_core::types::{BidType, FrequencyCapping, TargetingRules};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub advertiser_id: String,
    pub budget_daily: f64,
    pub budget_total: f64,
    pub bid_type: BidType,
    pub bid_amount: f64,
    #[serde(default)]
    pub targeting_rules: Option<TargetingRules>,
    #[serde(default)]
    pub frequency_capping: Option<FrequencyCapping>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub status: Option<adserve_core::types::CampaignStatus>,
    pub budget_daily: Option<f64>,
    pub budget_total: Option<f64>,
    pub bid_type: Option<BidType>,
    pub bid_amount: Option<f64>,
    pub targeting_rules: Option<TargetingRules>,
    pub frequency_capping: Option<FrequencyCapping>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub campaign_id: Uuid,
    #[serde(default)]
    pub creative_id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    /// Conversion value; ignored for impressions and clicks.
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub status: &'static str,
    pub event_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub time: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
