//! Domain types shared across services — campaigns, targeting, tracking
//! events, auction results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Complete,
}

/// Pricing model. CPM is charged at auction time; CPC and CPA are charged
/// when the priced lifecycle event arrives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BidType {
    #[serde(rename = "CPM")]
    Cpm,
    #[serde(rename = "CPC")]
    Cpc,
    #[serde(rename = "CPA")]
    Cpa,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub advertiser_id: String,
    pub status: CampaignStatus,
    pub budget_daily: f64,
    pub budget_total: f64,
    pub spent_daily: f64,
    pub spent_total: f64,
    pub bid_type: BidType,
    pub bid_amount: f64,
    pub targeting_rules: Option<TargetingRules>,
    pub frequency_capping: Option<FrequencyCapping>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Daily budget still unspent according to the durable snapshot.
    /// The fast store holds the authoritative live value; this is only a
    /// scoring heuristic input.
    pub fn remaining_daily(&self) -> f64 {
        self.budget_daily - self.spent_daily
    }
}

// ─── Targeting ─────────────────────────────────────────────────────────────

/// An empty set on any dimension means "no constraint on that dimension".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TargetingRules {
    #[serde(default)]
    pub geo_targeting: Vec<String>,
    #[serde(default)]
    pub device_types: Vec<String>,
    #[serde(default)]
    pub user_segments: Vec<String>,
    #[serde(default)]
    pub day_parting: Vec<DayPartRule>,
    #[serde(default)]
    pub custom_targeting: HashMap<String, String>,
}

/// Half-open hour window `[start_hour, end_hour)` on a single weekday
/// (0 = Sunday), evaluated in local server time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DayPartRule {
    pub day_of_week: u32,
    pub start_hour: u32,
    pub end_hour: u32,
}

// ─── Frequency capping ─────────────────────────────────────────────────────

/// Per-event-type caps over a rolling window. A cap of 0 means unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrequencyCapping {
    pub impression_cap: u32,
    pub click_cap: u32,
    pub time_window_secs: u64,
}

impl FrequencyCapping {
    pub fn cap_for(&self, event_type: TrackingEventType) -> u32 {
        match event_type {
            TrackingEventType::Impression => self.impression_cap,
            TrackingEventType::Click => self.click_cap,
            _ => 0,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }
}

// ─── Tracking events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackingEventType {
    Impression,
    Click,
    Conversion,
    Viewable,
}

impl TrackingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingEventType::Impression => "impression",
            TrackingEventType::Click => "click",
            TrackingEventType::Conversion => "conversion",
            TrackingEventType::Viewable => "viewable",
        }
    }

    /// Name of the cache metric partition this event type counts into.
    pub fn metric_kind(&self) -> &'static str {
        match self {
            TrackingEventType::Impression => "impressions",
            TrackingEventType::Click => "clicks",
            TrackingEventType::Conversion => "conversions",
            TrackingEventType::Viewable => "viewables",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: TrackingEventType,
    pub campaign_id: Uuid,
    pub creative_id: Option<Uuid>,
    pub user_id: String,
    pub session_id: String,
    pub ip: String,
    pub user_agent: String,
    pub referrer: String,
    /// 0 until assigned during validation for performance-priced campaigns.
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// ─── Auction ───────────────────────────────────────────────────────────────

/// Immutable record of one completed auction, cached under the request id
/// and published to the `auction-results` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionResult {
    pub id: Uuid,
    pub bid_request_id: String,
    pub winning_bid_id: Option<Uuid>,
    pub winning_price: f64,
    pub second_price: f64,
    pub total_bids: usize,
    pub auction_type: String,
    pub processing_time_ms: i64,
    pub timestamp: DateTime<Utc>,
}

// ─── Metrics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub campaign_id: Uuid,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub spend: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bid_type_serde_uses_uppercase_wire_names() {
        assert_eq!(serde_json::to_string(&BidType::Cpm).unwrap(), "\"CPM\"");
        let parsed: BidType = serde_json::from_str("\"CPA\"").unwrap();
        assert_eq!(parsed, BidType::Cpa);
    }

    #[test]
    fn test_frequency_cap_for_event_type() {
        let caps = FrequencyCapping {
            impression_cap: 3,
            click_cap: 1,
            time_window_secs: 3600,
        };
        assert_eq!(caps.cap_for(TrackingEventType::Impression), 3);
        assert_eq!(caps.cap_for(TrackingEventType::Click), 1);
        // Conversions are never capped.
        assert_eq!(caps.cap_for(TrackingEventType::Conversion), 0);
        assert_eq!(caps.window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_targeting_rules_default_is_unconstrained() {
        let rules: TargetingRules = serde_json::from_str("{}").unwrap();
        assert!(rules.geo_targeting.is_empty());
        assert!(rules.device_types.is_empty());
        assert!(rules.day_parting.is_empty());
    }
}
