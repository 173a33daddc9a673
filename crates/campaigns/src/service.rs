//! Campaign lifecycle and real-time budget arbitration.
//!
//! The fast store is the sole arbiter of live budget; the durable row is a
//! lagging ledger updated by a detached write-behind task after each commit.

use adserve_cache::RedisStore;
use adserve_core::error::{AdServeError, AdServeResult};
use adserve_core::event_bus::{publish_json, topics, EventBus};
use adserve_core::types::{Campaign, CampaignMetrics, CampaignStatus, TrackingEventType};
use adserve_store::CampaignStore;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Payload published to `campaign-updates` on create/update.
#[derive(Debug, Serialize)]
struct CampaignUpdateEvent<'a> {
    action: &'static str,
    campaign: &'a Campaign,
    timestamp: DateTime<Utc>,
}

pub struct CampaignService {
    store: Arc<CampaignStore>,
    cache: Arc<RedisStore>,
    bus: Arc<dyn EventBus>,
}

impl CampaignService {
    pub fn new(store: Arc<CampaignStore>, cache: Arc<RedisStore>, bus: Arc<dyn EventBus>) -> Self {
        Self { store, cache, bus }
    }

    // ─── CRUD ──────────────────────────────────────────────────────────────

    /// Create a campaign: validate, persist as draft with zero spend, and
    /// initialize the live budget counters.
    pub async fn create(&self, mut campaign: Campaign) -> AdServeResult<Campaign> {
        validate(&campaign)?;

        let now = Utc::now();
        campaign.id = Uuid::new_v4();
        campaign.status = CampaignStatus::Draft;
        campaign.spent_daily = 0.0;
        campaign.spent_total = 0.0;
        campaign.created_at = now;
        campaign.updated_at = now;

        self.store.insert(&campaign).await?;

        if let Err(e) = self
            .cache
            .set_campaign_budgets(campaign.id, campaign.budget_daily, campaign.budget_total)
            .await
        {
            error!(error = %e, campaign_id = %campaign.id, "Failed to set campaign budget in cache");
        }

        self.publish_update(&campaign, "created");
        metrics::counter!("campaigns.created").increment(1);
        info!(campaign_id = %campaign.id, advertiser = %campaign.advertiser_id, "Campaign created");

        Ok(campaign)
    }

    pub async fn get(&self, campaign_id: Uuid) -> AdServeResult<Campaign> {
        self.store
            .fetch(campaign_id)
            .await?
            .ok_or_else(|| AdServeError::NotFound(format!("campaign {campaign_id}")))
    }

    /// Persist changed fields and refresh the live budget counters. Updating
    /// a serving campaign is permitted; the effective budget is whatever the
    /// fast store reflects after this write.
    pub async fn update(&self, mut campaign: Campaign) -> AdServeResult<Campaign> {
        campaign.updated_at = Utc::now();

        self.store.update(&campaign).await?;

        if let Err(e) = self
            .cache
            .set_campaign_budgets(campaign.id, campaign.budget_daily, campaign.budget_total)
            .await
        {
            error!(error = %e, campaign_id = %campaign.id, "Failed to update campaign budget in cache");
        }

        self.publish_update(&campaign, "updated");
        metrics::counter!("campaigns.updated").increment(1);

        Ok(campaign)
    }

    /// Campaigns serveable at `now` according to the durable snapshot.
    pub async fn list_active(&self, now: DateTime<Utc>) -> AdServeResult<Vec<Campaign>> {
        Ok(self.store.list_active(now).await?)
    }

    // ─── Budget ────────────────────────────────────────────────────────────

    /// Atomically debit the live budget. On success the durable ledger is
    /// updated by a detached task; under crash the fast store is the truth
    /// and the ledger catches up on replay.
    pub async fn try_commit_budget(&self, campaign_id: Uuid, amount: f64) -> AdServeResult<bool> {
        let committed = self.cache.try_debit(campaign_id, amount).await?;

        if !committed {
            debug!(campaign_id = %campaign_id, amount = amount, "Budget check refused debit");
            return Ok(false);
        }

        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.add_spend(campaign_id, amount).await {
                error!(error = %e, campaign_id = %campaign_id, "Failed to update spent in database");
            }
        });

        Ok(true)
    }

    // ─── Frequency capping ─────────────────────────────────────────────────

    /// Whether `user_id` is still under the campaign's cap for this event
    /// type. No rule, or a cap of 0, means unlimited.
    pub async fn check_frequency_cap(
        &self,
        user_id: &str,
        campaign: &Campaign,
        event_type: TrackingEventType,
    ) -> AdServeResult<bool> {
        let Some(rule) = campaign.frequency_capping else {
            return Ok(true);
        };

        let cap = rule.cap_for(event_type);
        if cap == 0 {
            return Ok(true);
        }

        let count = self
            .cache
            .frequency_count(user_id, campaign.id, event_type.as_str())
            .await?;

        Ok(count < i64::from(cap))
    }

    /// Count an event toward the user's cap, re-arming the rolling window.
    pub async fn increment_frequency_cap(
        &self,
        user_id: &str,
        campaign: &Campaign,
        event_type: TrackingEventType,
    ) -> AdServeResult<()> {
        let Some(rule) = campaign.frequency_capping else {
            return Ok(());
        };

        self.cache
            .increment_frequency(user_id, campaign.id, event_type.as_str(), rule.window())
            .await?;

        Ok(())
    }

    // ─── Pacing ────────────────────────────────────────────────────────────

    /// Probabilistic throttle that spreads the daily budget across the day:
    /// 0.5 when spend is more than 20% ahead of the clock, 0.8 when ahead at
    /// all, 1.0 otherwise.
    pub fn pacing_rate(&self, campaign: &Campaign, now: DateTime<Utc>) -> f64 {
        pacing_rate(campaign, now)
    }

    // ─── Metrics ───────────────────────────────────────────────────────────

    /// Live counters from the fast store combined with the canonical spend
    /// from the durable row.
    pub async fn metrics(&self, campaign_id: Uuid, date: &str) -> AdServeResult<CampaignMetrics> {
        let impressions = self.metric_or_zero("impressions", campaign_id, date).await;
        let clicks = self.metric_or_zero("clicks", campaign_id, date).await;
        let conversions = self.metric_or_zero("conversions", campaign_id, date).await;

        let campaign = self.get(campaign_id).await?;

        Ok(compute_metrics(
            campaign_id,
            impressions,
            clicks,
            conversions,
            campaign.spent_daily,
        ))
    }

    async fn metric_or_zero(&self, kind: &str, campaign_id: Uuid, date: &str) -> i64 {
        match self.cache.metric_count(kind, campaign_id, date).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, kind = kind, campaign_id = %campaign_id, "Failed to read metric");
                0
            }
        }
    }

    // ─── Daily reset ───────────────────────────────────────────────────────

    /// Day-boundary reset: zero the durable daily spend, then rewrite the
    /// live counters to `(daily, total - spent_total)` for each active
    /// campaign.
    pub async fn reset_daily_budgets(&self, now: DateTime<Utc>) -> AdServeResult<()> {
        self.store.reset_daily_spend().await?;

        let campaigns = self.list_active(now).await?;

        for campaign in &campaigns {
            if let Err(e) = self
                .cache
                .set_campaign_budgets(
                    campaign.id,
                    campaign.budget_daily,
                    campaign.budget_total - campaign.spent_total,
                )
                .await
            {
                error!(error = %e, campaign_id = %campaign.id, "Failed to reset budget in cache");
            }
        }

        info!(count = campaigns.len(), "Daily budgets reset");
        Ok(())
    }

    fn publish_update(&self, campaign: &Campaign, action: &'static str) {
        publish_json(
            self.bus.as_ref(),
            topics::CAMPAIGN_UPDATES,
            &CampaignUpdateEvent {
                action,
                campaign,
                timestamp: Utc::now(),
            },
        );
    }
}

fn validate(campaign: &Campaign) -> AdServeResult<()> {
    if campaign.budget_daily <= 0.0 {
        return Err(AdServeError::Validation(
            "daily budget must be positive".into(),
        ));
    }
    if campaign.budget_total < campaign.budget_daily {
        return Err(AdServeError::Validation(
            "total budget cannot be below daily budget".into(),
        ));
    }
    if let Some(end) = campaign.end_date {
        if campaign.start_date >= end {
            return Err(AdServeError::Validation(
                "start date must precede end date".into(),
            ));
        }
    }
    if campaign.bid_amount < 0.0 {
        return Err(AdServeError::Validation(
            "bid amount cannot be negative".into(),
        ));
    }
    Ok(())
}

fn pacing_rate(campaign: &Campaign, now: DateTime<Utc>) -> f64 {
    if campaign.budget_daily <= 0.0 {
        return 1.0;
    }

    let day_progress = f64::from(now.hour() * 60 + now.minute()) / (24.0 * 60.0);
    let budget_progress = campaign.spent_daily / campaign.budget_daily;

    if budget_progress > day_progress * 1.2 {
        0.5
    } else if budget_progress > day_progress {
        0.8
    } else {
        1.0
    }
}

fn compute_metrics(
    campaign_id: Uuid,
    impressions: i64,
    clicks: i64,
    conversions: i64,
    spend: f64,
) -> CampaignMetrics {
    let mut metrics = CampaignMetrics {
        campaign_id,
        impressions,
        clicks,
        conversions,
        spend,
        ctr: 0.0,
        cpc: 0.0,
        cpm: 0.0,
        date: Utc::now(),
    };

    if impressions > 0 {
        metrics.ctr = clicks as f64 / impressions as f64 * 100.0;
        metrics.cpm = spend / impressions as f64 * 1000.0;
    }
    if clicks > 0 {
        metrics.cpc = spend / clicks as f64;
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use adserve_core::types::BidType;
    use chrono::TimeZone;

    fn sample_campaign() -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            name: "Spring Sale".to_string(),
            advertiser_id: "adv-1".to_string(),
            status: CampaignStatus::Active,
            budget_daily: 100.0,
            budget_total: 1000.0,
            spent_daily: 0.0,
            spent_total: 0.0,
            bid_type: BidType::Cpm,
            bid_amount: 1.0,
            targeting_rules: None,
            frequency_capping: None,
            start_date: now,
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_validate_rejects_nonpositive_daily_budget() {
        let mut campaign = sample_campaign();
        campaign.budget_daily = 0.0;
        assert!(matches!(
            validate(&campaign),
            Err(AdServeError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_total_below_daily() {
        let mut campaign = sample_campaign();
        campaign.budget_daily = 100.0;
        campaign.budget_total = 50.0;
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut campaign = sample_campaign();
        campaign.end_date = Some(campaign.start_date);
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_validate_rejects_negative_bid() {
        let mut campaign = sample_campaign();
        campaign.bid_amount = -0.01;
        assert!(validate(&campaign).is_err());
    }

    #[test]
    fn test_validate_accepts_open_ended_campaign() {
        assert!(validate(&sample_campaign()).is_ok());
    }

    #[test]
    fn test_pacing_full_rate_when_on_schedule() {
        let mut campaign = sample_campaign();
        campaign.spent_daily = 10.0; // 10% spent
        let noon = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap(); // 50% of day
        assert_eq!(pacing_rate(&campaign, noon), 1.0);
    }

    #[test]
    fn test_pacing_throttles_when_slightly_ahead() {
        let mut campaign = sample_campaign();
        campaign.spent_daily = 55.0; // 55% spent at 50% of day
        let noon = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(pacing_rate(&campaign, noon), 0.8);
    }

    #[test]
    fn test_pacing_halves_when_far_ahead() {
        let mut campaign = sample_campaign();
        campaign.spent_daily = 70.0; // 70% spent at 50% of day, over 1.2x
        let noon = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(pacing_rate(&campaign, noon), 0.5);
    }

    #[test]
    fn test_metrics_computation_guards_division() {
        let id = Uuid::new_v4();
        let empty = compute_metrics(id, 0, 0, 0, 5.0);
        assert_eq!(empty.ctr, 0.0);
        assert_eq!(empty.cpc, 0.0);
        assert_eq!(empty.cpm, 0.0);

        let busy = compute_metrics(id, 1000, 20, 2, 5.0);
        assert_eq!(busy.ctr, 2.0);
        assert_eq!(busy.cpc, 0.25);
        assert_eq!(busy.cpm, 5.0);
    }
}
