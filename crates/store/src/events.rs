//! Append-only lifecycle-event repository. Single inserts come from the
//! tracking workers; batched inserts from the periodic flusher.

use adserve_core::types::TrackingEvent;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Error as SqlxError;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

const INSERT_EVENT: &str = "INSERT INTO tracking_events (
        id, type, campaign_id, creative_id, user_id, session_id,
        ip, user_agent, referrer, price, timestamp, processed_at, metadata
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

/// Lifecycle-event repository over the shared connection pool.
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, event: &TrackingEvent) -> Result<(), SqlxError> {
        sqlx::query(INSERT_EVENT)
            .bind(event.id)
            .bind(event.event_type.as_str())
            .bind(event.campaign_id)
            .bind(event.creative_id)
            .bind(&event.user_id)
            .bind(&event.session_id)
            .bind(&event.ip)
            .bind(&event.user_agent)
            .bind(&event.referrer)
            .bind(event.price)
            .bind(event.timestamp)
            .bind(Utc::now())
            .bind(sqlx::types::Json(&event.metadata))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Write a batch in one transaction. The insert statement is prepared
    /// once per connection and reused for every row.
    pub async fn insert_batch(&self, events: &[TrackingEvent]) -> Result<(), SqlxError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let processed_at = Utc::now();

        for event in events {
            sqlx::query(INSERT_EVENT)
                .bind(event.id)
                .bind(event.event_type.as_str())
                .bind(event.campaign_id)
                .bind(event.creative_id)
                .bind(&event.user_id)
                .bind(&event.session_id)
                .bind(&event.ip)
                .bind(&event.user_agent)
                .bind(&event.referrer)
                .bind(event.price)
                .bind(event.timestamp)
                .bind(processed_at)
                .bind(sqlx::types::Json(&event.metadata))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await
    }

    /// Event counts by type for a campaign over a time range.
    pub async fn counts_by_type(
        &self,
        campaign_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, i64>, SqlxError> {
        let rows = sqlx::query(
            "SELECT type, COUNT(*) AS count
             FROM tracking_events
             WHERE campaign_id = $1 AND timestamp BETWEEN $2 AND $3
             GROUP BY type",
        )
        .bind(campaign_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = HashMap::new();
        for row in rows {
            let event_type: String = row.try_get("type")?;
            let count: i64 = row.try_get("count")?;
            stats.insert(event_type, count);
        }

        Ok(stats)
    }
}
