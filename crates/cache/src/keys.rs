//! Key layout for the fast store. Every key is scoped by entity and
//! partition so event types and date windows never collide.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn daily_budget(campaign_id: Uuid) -> String {
    format!("campaign:budget:daily:{campaign_id}")
}

pub fn total_budget(campaign_id: Uuid) -> String {
    format!("campaign:budget:total:{campaign_id}")
}

pub fn frequency(event_type: &str, campaign_id: Uuid, user_id: &str) -> String {
    format!("freq:{event_type}:{campaign_id}:{user_id}")
}

/// Daily metric partition: `metrics:{kind}:{campaign}:{YYYY-MM-DD}`.
pub fn metric_day(kind: &str, campaign_id: Uuid, at: DateTime<Utc>) -> String {
    format!("metrics:{kind}:{campaign_id}:{}", at.format("%Y-%m-%d"))
}

/// Hourly metric partition: `metrics:{kind}:{campaign}:{YYYY-MM-DD:HH}`.
pub fn metric_hour(kind: &str, campaign_id: Uuid, at: DateTime<Utc>) -> String {
    format!("metrics:{kind}:{campaign_id}:{}", at.format("%Y-%m-%d:%H"))
}

/// Metric partition for a caller-supplied date string (`YYYY-MM-DD` or
/// `YYYY-MM-DD:HH`).
pub fn metric_partition(kind: &str, campaign_id: Uuid, date: &str) -> String {
    format!("metrics:{kind}:{campaign_id}:{date}")
}

pub fn pacing(campaign_id: Uuid) -> String {
    format!("pacing:{campaign_id}")
}

pub fn rate_limit(identifier: &str) -> String {
    format!("ratelimit:{identifier}")
}

pub fn bid_request(request_id: &str) -> String {
    format!("bidrequest:{request_id}")
}

pub fn auction_bids(auction_id: &str) -> String {
    format!("auction:{auction_id}:bids")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 30, 0).unwrap();

        assert_eq!(
            daily_budget(id),
            "campaign:budget:daily:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            frequency("impression", id, "user-1"),
            "freq:impression:00000000-0000-0000-0000-000000000000:user-1"
        );
        assert_eq!(
            metric_day("clicks", id, at),
            "metrics:clicks:00000000-0000-0000-0000-000000000000:2024-03-07"
        );
        assert_eq!(
            metric_hour("clicks", id, at),
            "metrics:clicks:00000000-0000-0000-0000-000000000000:2024-03-07:09"
        );
        assert_eq!(auction_bids("req-1"), "auction:req-1:bids");
    }

    #[test]
    fn test_event_types_partition_separately() {
        let id = Uuid::nil();
        assert_ne!(
            frequency("impression", id, "u"),
            frequency("click", id, "u")
        );
    }
}
