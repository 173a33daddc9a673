//! Idempotent schema bootstrap, run once at server start.

use sqlx::postgres::PgPool;
use sqlx::Error as SqlxError;
use tracing::info;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS campaigns (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        advertiser_id VARCHAR(255) NOT NULL,
        status VARCHAR(50) NOT NULL,
        budget_daily DOUBLE PRECISION NOT NULL,
        budget_total DOUBLE PRECISION NOT NULL,
        spent_daily DOUBLE PRECISION DEFAULT 0,
        spent_total DOUBLE PRECISION DEFAULT 0,
        bid_type VARCHAR(20) NOT NULL,
        bid_amount DOUBLE PRECISION NOT NULL,
        targeting_rules JSONB,
        frequency_capping JSONB,
        start_date TIMESTAMPTZ NOT NULL,
        end_date TIMESTAMPTZ,
        created_at TIMESTAMPTZ DEFAULT NOW(),
        updated_at TIMESTAMPTZ DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status)",
    "CREATE INDEX IF NOT EXISTS idx_campaigns_advertiser ON campaigns(advertiser_id)",
    "CREATE TABLE IF NOT EXISTS tracking_events (
        id UUID PRIMARY KEY,
        type VARCHAR(50) NOT NULL,
        campaign_id UUID NOT NULL,
        creative_id UUID,
        user_id VARCHAR(255),
        session_id VARCHAR(255),
        ip VARCHAR(45),
        user_agent TEXT,
        referrer TEXT,
        price DOUBLE PRECISION,
        timestamp TIMESTAMPTZ DEFAULT NOW(),
        processed_at TIMESTAMPTZ,
        metadata JSONB
    )",
    "CREATE INDEX IF NOT EXISTS idx_tracking_campaign ON tracking_events(campaign_id)",
    "CREATE INDEX IF NOT EXISTS idx_tracking_type ON tracking_events(type)",
    "CREATE INDEX IF NOT EXISTS idx_tracking_timestamp ON tracking_events(timestamp)",
    "CREATE TABLE IF NOT EXISTS ad_creatives (
        id UUID PRIMARY KEY,
        campaign_id UUID NOT NULL REFERENCES campaigns(id),
        name VARCHAR(255) NOT NULL,
        type VARCHAR(50) NOT NULL,
        format VARCHAR(50),
        width INT,
        height INT,
        asset_url TEXT,
        click_url TEXT,
        impression_url TEXT,
        html TEXT,
        status VARCHAR(50),
        created_at TIMESTAMPTZ DEFAULT NOW(),
        updated_at TIMESTAMPTZ DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_creatives_campaign ON ad_creatives(campaign_id)",
];

pub async fn run_migrations(pool: &PgPool) -> Result<(), SqlxError> {
    for migration in MIGRATIONS {
        sqlx::query(migration).execute(pool).await?;
    }

    info!("Database schema verified");
    Ok(())
}
