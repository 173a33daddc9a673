//! Campaign repository. Targeting and frequency-cap rules live in JSONB
//! columns and are hydrated into typed structs on read.

use adserve_core::types::{BidType, Campaign, CampaignStatus, FrequencyCapping, TargetingRules};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Error as SqlxError;
use sqlx::Row;
use uuid::Uuid;

fn status_str(status: CampaignStatus) -> &'static str {
    match status {
        CampaignStatus::Draft => "draft",
        CampaignStatus::Active => "active",
        CampaignStatus::Paused => "paused",
        CampaignStatus::Complete => "complete",
    }
}

fn parse_status(s: &str) -> Result<CampaignStatus, SqlxError> {
    match s {
        "draft" => Ok(CampaignStatus::Draft),
        "active" => Ok(CampaignStatus::Active),
        "paused" => Ok(CampaignStatus::Paused),
        "complete" => Ok(CampaignStatus::Complete),
        other => Err(SqlxError::Decode(
            format!("unknown campaign status: {other}").into(),
        )),
    }
}

fn bid_type_str(bid_type: BidType) -> &'static str {
    match bid_type {
        BidType::Cpm => "CPM",
        BidType::Cpc => "CPC",
        BidType::Cpa => "CPA",
    }
}

fn parse_bid_type(s: &str) -> Result<BidType, SqlxError> {
    match s {
        "CPM" => Ok(BidType::Cpm),
        "CPC" => Ok(BidType::Cpc),
        "CPA" => Ok(BidType::Cpa),
        other => Err(SqlxError::Decode(
            format!("unknown bid type: {other}").into(),
        )),
    }
}

const CAMPAIGN_COLUMNS: &str = "id, name, advertiser_id, status, budget_daily, budget_total, \
     spent_daily, spent_total, bid_type, bid_amount, targeting_rules, \
     frequency_capping, start_date, end_date, created_at, updated_at";

fn row_to_campaign(row: &sqlx::postgres::PgRow) -> Result<Campaign, SqlxError> {
    let status: String = row.try_get("status")?;
    let bid_type: String = row.try_get("bid_type")?;
    let targeting_rules: Option<sqlx::types::Json<TargetingRules>> =
        row.try_get("targeting_rules")?;
    let frequency_capping: Option<sqlx::types::Json<FrequencyCapping>> =
        row.try_get("frequency_capping")?;

    Ok(Campaign {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        advertiser_id: row.try_get("advertiser_id")?,
        status: parse_status(&status)?,
        budget_daily: row.try_get("budget_daily")?,
        budget_total: row.try_get("budget_total")?,
        spent_daily: row.try_get("spent_daily")?,
        spent_total: row.try_get("spent_total")?,
        bid_type: parse_bid_type(&bid_type)?,
        bid_amount: row.try_get("bid_amount")?,
        targeting_rules: targeting_rules.map(|j| j.0),
        frequency_capping: frequency_capping.map(|j| j.0),
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Campaign repository over the shared connection pool.
pub struct CampaignStore {
    pool: PgPool,
}

impl CampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, campaign: &Campaign) -> Result<(), SqlxError> {
        sqlx::query(
            "INSERT INTO campaigns (
                id, name, advertiser_id, status, budget_daily, budget_total,
                spent_daily, spent_total, bid_type, bid_amount, targeting_rules,
                frequency_capping, start_date, end_date, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(campaign.id)
        .bind(&campaign.name)
        .bind(&campaign.advertiser_id)
        .bind(status_str(campaign.status))
        .bind(campaign.budget_daily)
        .bind(campaign.budget_total)
        .bind(campaign.spent_daily)
        .bind(campaign.spent_total)
        .bind(bid_type_str(campaign.bid_type))
        .bind(campaign.bid_amount)
        .bind(campaign.targeting_rules.as_ref().map(sqlx::types::Json))
        .bind(campaign.frequency_capping.as_ref().map(sqlx::types::Json))
        .bind(campaign.start_date)
        .bind(campaign.end_date)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update(&self, campaign: &Campaign) -> Result<(), SqlxError> {
        sqlx::query(
            "UPDATE campaigns SET
                name = $2, status = $3, budget_daily = $4, budget_total = $5,
                bid_type = $6, bid_amount = $7, targeting_rules = $8,
                frequency_capping = $9, end_date = $10, updated_at = $11
             WHERE id = $1",
        )
        .bind(campaign.id)
        .bind(&campaign.name)
        .bind(status_str(campaign.status))
        .bind(campaign.budget_daily)
        .bind(campaign.budget_total)
        .bind(bid_type_str(campaign.bid_type))
        .bind(campaign.bid_amount)
        .bind(campaign.targeting_rules.as_ref().map(sqlx::types::Json))
        .bind(campaign.frequency_capping.as_ref().map(sqlx::types::Json))
        .bind(campaign.end_date)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch(&self, campaign_id: Uuid) -> Result<Option<Campaign>, SqlxError> {
        let row = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_campaign).transpose()
    }

    /// All campaigns serveable at `now` according to the durable snapshot.
    /// The fast store re-checks budgets at commit time.
    pub async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, SqlxError> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status = 'active'
               AND start_date <= $1
               AND (end_date IS NULL OR end_date > $1)
               AND spent_total < budget_total
               AND spent_daily < budget_daily",
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_campaign).collect()
    }

    /// Write-behind spend ledger update. Monotonic within a UTC day.
    pub async fn add_spend(&self, campaign_id: Uuid, amount: f64) -> Result<(), SqlxError> {
        sqlx::query(
            "UPDATE campaigns
             SET spent_daily = spent_daily + $2,
                 spent_total = spent_total + $2,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(campaign_id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Zero the daily spend of every active campaign at the day boundary.
    pub async fn reset_daily_spend(&self) -> Result<(), SqlxError> {
        sqlx::query("UPDATE campaigns SET spent_daily = 0 WHERE status = 'active'")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Active,
            CampaignStatus::Paused,
            CampaignStatus::Complete,
        ] {
            assert_eq!(parse_status(status_str(status)).unwrap(), status);
        }
        assert!(parse_status("archived").is_err());
    }

    #[test]
    fn test_bid_type_roundtrip() {
        for bid_type in [BidType::Cpm, BidType::Cpc, BidType::Cpa] {
            assert_eq!(parse_bid_type(bid_type_str(bid_type)).unwrap(), bid_type);
        }
        assert!(parse_bid_type("cpm").is_err());
    }
}
