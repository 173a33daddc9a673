//! Redis client for live budgets, frequency counters, and metric tallies.
//! Every mutation is a single pipeline or Lua script so it either applies
//! wholly or leaves state unchanged.

use crate::keys;
use adserve_core::config::RedisConfig;
use chrono::Utc;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Lua: decrement both budget counters only when each can cover the amount.
/// Must execute as one script — the two keys change together or not at all.
const TRY_DEBIT_SCRIPT: &str = r#"
local daily_key = KEYS[1]
local total_key = KEYS[2]
local amount = tonumber(ARGV[1])

local daily_budget = redis.call('get', daily_key)
local total_budget = redis.call('get', total_key)

if not daily_budget or not total_budget then
    return 0
end

daily_budget = tonumber(daily_budget)
total_budget = tonumber(total_budget)

if daily_budget < amount or total_budget < amount then
    return 0
end

redis.call('incrbyfloat', daily_key, -amount)
redis.call('incrbyfloat', total_key, -amount)
return 1
"#;

/// Lua: counting rate limiter. The first hit in a window arms the expiry.
const RATE_LIMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local current = redis.call('incr', key)

if current == 1 then
    redis.call('expire', key, window)
end

if current > limit then
    return 0
end
return 1
"#;

/// Shared fast store backed by a multiplexed Redis connection.
pub struct RedisStore {
    client: redis::Client,
    try_debit: redis::Script,
    rate_limit: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and verify connectivity.
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        info!(url = %config.url, "Connecting to Redis");

        let client = redis::Client::open(config.url.as_str())?;

        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            client,
            try_debit: redis::Script::new(TRY_DEBIT_SCRIPT),
            rate_limit: redis::Script::new(RATE_LIMIT_SCRIPT),
        })
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    // ─── Budgets ───────────────────────────────────────────────────────────

    /// Reset both live budget counters. The daily counter expires after
    /// 24 h; the total counter has no TTL.
    pub async fn set_campaign_budgets(
        &self,
        campaign_id: Uuid,
        daily: f64,
        total: f64,
    ) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .set_ex(keys::daily_budget(campaign_id), daily, 24 * 3600)
            .set(keys::total_budget(campaign_id), total)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Atomically debit both counters, or neither. Returns false when either
    /// counter is missing or cannot cover the amount.
    pub async fn try_debit(&self, campaign_id: Uuid, amount: f64) -> redis::RedisResult<bool> {
        let mut conn = self.conn().await?;
        let committed: i64 = self
            .try_debit
            .key(keys::daily_budget(campaign_id))
            .key(keys::total_budget(campaign_id))
            .arg(amount)
            .invoke_async(&mut conn)
            .await?;
        Ok(committed == 1)
    }

    // ─── Frequency counters ────────────────────────────────────────────────

    /// Increment the per-user frequency counter and refresh its rolling
    /// window. Returns the new count.
    pub async fn increment_frequency(
        &self,
        user_id: &str,
        campaign_id: Uuid,
        event_type: &str,
        window: Duration,
    ) -> redis::RedisResult<i64> {
        let key = keys::frequency(event_type, campaign_id, user_id);
        let mut conn = self.conn().await?;
        let (count,): (i64,) = redis::pipe()
            .incr(&key, 1)
            .expire(&key, window.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Current frequency count; a missing key reads as 0.
    pub async fn frequency_count(
        &self,
        user_id: &str,
        campaign_id: Uuid,
        event_type: &str,
    ) -> redis::RedisResult<i64> {
        let mut conn = self.conn().await?;
        let count: Option<i64> = conn
            .get(keys::frequency(event_type, campaign_id, user_id))
            .await?;
        Ok(count.unwrap_or(0))
    }

    // ─── Metrics ───────────────────────────────────────────────────────────

    /// Bump the daily (7 d TTL) and hourly (24 h TTL) metric partitions.
    pub async fn increment_metric(&self, kind: &str, campaign_id: Uuid) -> redis::RedisResult<()> {
        let now = Utc::now();
        let day_key = keys::metric_day(kind, campaign_id, now);
        let hour_key = keys::metric_hour(kind, campaign_id, now);

        let mut conn = self.conn().await?;
        redis::pipe()
            .incr(&day_key, 1)
            .ignore()
            .expire(&day_key, 7 * 24 * 3600)
            .ignore()
            .incr(&hour_key, 1)
            .ignore()
            .expire(&hour_key, 24 * 3600)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Read a metric partition; a missing key reads as 0.
    pub async fn metric_count(
        &self,
        kind: &str,
        campaign_id: Uuid,
        date: &str,
    ) -> redis::RedisResult<i64> {
        let mut conn = self.conn().await?;
        let count: Option<i64> = conn
            .get(keys::metric_partition(kind, campaign_id, date))
            .await?;
        Ok(count.unwrap_or(0))
    }

    // ─── Pacing ────────────────────────────────────────────────────────────

    pub async fn set_pacing_rate(
        &self,
        campaign_id: Uuid,
        rate: f64,
        ttl: Duration,
    ) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(keys::pacing(campaign_id), rate, ttl.as_secs())
            .await?;
        Ok(())
    }

    /// Pacing rate; a missing key reads as 1.0 (no throttle).
    pub async fn pacing_rate(&self, campaign_id: Uuid) -> redis::RedisResult<f64> {
        let mut conn = self.conn().await?;
        let rate: Option<f64> = conn.get(keys::pacing(campaign_id)).await?;
        Ok(rate.unwrap_or(1.0))
    }

    // ─── Rate limiting ─────────────────────────────────────────────────────

    /// Counting rate limiter. Returns false once the identifier exceeds
    /// `limit` hits within `window`.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> redis::RedisResult<bool> {
        let mut conn = self.conn().await?;
        let allowed: i64 = self
            .rate_limit
            .key(keys::rate_limit(identifier))
            .arg(limit)
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }

    // ─── Auction state ─────────────────────────────────────────────────────

    /// Add a bid to the auction's score-sorted set.
    pub async fn add_auction_bid<T: serde::Serialize>(
        &self,
        auction_id: &str,
        bid: &T,
        score: f64,
        expiry: Duration,
    ) -> redis::RedisResult<()> {
        let key = keys::auction_bids(auction_id);
        let member = serde_json::to_string(bid).map_err(serialize_err)?;
        let mut conn = self.conn().await?;
        redis::pipe()
            .zadd(&key, member, score)
            .ignore()
            .expire(&key, expiry.as_secs() as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Top `limit` bids by descending score.
    pub async fn top_auction_bids(
        &self,
        auction_id: &str,
        limit: isize,
    ) -> redis::RedisResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let bids: Vec<String> = conn
            .zrevrange(keys::auction_bids(auction_id), 0, limit - 1)
            .await?;
        Ok(bids)
    }

    /// Cache the auction result under the originating request id.
    pub async fn cache_auction_result<T: serde::Serialize>(
        &self,
        request_id: &str,
        result: &T,
        ttl: Duration,
    ) -> redis::RedisResult<()> {
        let data = serde_json::to_string(result).map_err(serialize_err)?;
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(keys::bid_request(request_id), data, ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn cached_auction_result(&self, request_id: &str) -> redis::RedisResult<Option<String>> {
        let mut conn = self.conn().await?;
        let data: Option<String> = conn.get(keys::bid_request(request_id)).await?;
        Ok(data)
    }
}

fn serialize_err(e: serde_json::Error) -> redis::RedisError {
    (redis::ErrorKind::TypeError, "serialize", e.to_string()).into()
}
