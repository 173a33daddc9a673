//! Auction pipeline: gather active campaigns, evaluate eligibility in
//! parallel, score, pick a winner, resolve the cleared price, and commit
//! budget — all under one fixed deadline.
//!
//! Every internal failure collapses into a no-bid response; the only
//! user-visible outcomes are "bid" and "no bid". A debit that lands before
//! the deadline fires is not rolled back: budget integrity wins over
//! response-shape fidelity.

use adserve_cache::RedisStore;
use adserve_campaigns::CampaignService;
use adserve_core::config::AuctionConfig;
use adserve_core::error::AdServeError;
use adserve_core::event_bus::{publish_json, topics, EventBus};
use adserve_core::openrtb::{Bid, BidRequest, BidResponse, SeatBid};
use adserve_core::types::{AuctionResult, BidType, Campaign, TrackingEventType};
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// One candidate bid, alive only for the duration of the auction that
/// created it.
#[derive(Debug, Clone)]
pub struct BidEntry {
    pub bid: Bid,
    pub campaign_id: Uuid,
    pub score: f64,
}

pub struct AuctionEngine {
    campaigns: Arc<CampaignService>,
    cache: Arc<RedisStore>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
    result_ttl: Duration,
    seat: String,
}

impl AuctionEngine {
    pub fn new(
        campaigns: Arc<CampaignService>,
        cache: Arc<RedisStore>,
        bus: Arc<dyn EventBus>,
        config: &AuctionConfig,
    ) -> Self {
        Self {
            campaigns,
            cache,
            bus,
            timeout: Duration::from_millis(config.timeout_ms),
            result_ttl: Duration::from_secs(config.result_ttl_secs),
            seat: config.seat.clone(),
        }
    }

    /// Run one auction. Always answers; a deadline overrun or internal
    /// error yields a no-bid response with reason code 2.
    pub async fn run_auction(&self, request: Arc<BidRequest>) -> BidResponse {
        let start = Instant::now();
        metrics::counter!("auction.requests").increment(1);

        publish_json(self.bus.as_ref(), topics::BID_REQUESTS, request.as_ref());

        let response = match tokio::time::timeout(self.timeout, self.pipeline(&request, start)).await
        {
            Ok(response) => response,
            Err(_) => {
                let err = AdServeError::Timeout(format!(
                    "auction exceeded {}ms",
                    self.timeout.as_millis()
                ));
                metrics::counter!("auction.timeout").increment(1);
                warn!(error = %err, request_id = %request.id, "Auction abandoned");
                BidResponse::no_bid(request.id.clone())
            }
        };

        metrics::histogram!("auction.duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        if response.seatbid.is_empty() {
            metrics::counter!("auction.no_bid").increment(1);
        } else {
            metrics::counter!("auction.responded").increment(1);
        }

        publish_json(self.bus.as_ref(), topics::BID_RESPONSES, &response);

        response
    }

    async fn pipeline(&self, request: &Arc<BidRequest>, start: Instant) -> BidResponse {
        if request.imp.is_empty() {
            return BidResponse::no_bid(request.id.clone());
        }

        let active = match self.campaigns.list_active(Utc::now()).await {
            Ok(campaigns) => campaigns,
            Err(e) => {
                error!(error = %e, request_id = %request.id, "Failed to list active campaigns");
                return BidResponse::no_bid(request.id.clone());
            }
        };

        if active.is_empty() {
            return BidResponse::no_bid(request.id.clone());
        }

        let mut entries = self.collect_bids(request, active).await;

        if entries.is_empty() {
            return BidResponse::no_bid(request.id.clone());
        }

        let (winner, second_price) = match select_winner(&mut entries) {
            Some(selected) => selected,
            None => return BidResponse::no_bid(request.id.clone()),
        };

        let bid_floor = request.imp[0].bidfloor;
        let final_price = determine_final_price(winner.bid.price, second_price, bid_floor);

        match self
            .campaigns
            .try_commit_budget(winner.campaign_id, final_price)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(campaign_id = %winner.campaign_id, price = final_price, "Budget refused for winner");
                return BidResponse::no_bid(request.id.clone());
            }
            Err(e) => {
                warn!(error = %e, campaign_id = %winner.campaign_id, "Budget check failed for winner");
                return BidResponse::no_bid(request.id.clone());
            }
        }

        let response = self.build_response(request, &winner, final_price);

        self.record_result(
            request,
            &winner,
            final_price,
            second_price,
            entries.len(),
            start.elapsed(),
        )
        .await;

        response
    }

    /// Parallel eligibility fan-out: one task per active campaign, joined on
    /// the slowest survivor. Tasks still in flight when the auction deadline
    /// fires are abandoned and their late results discarded.
    async fn collect_bids(
        &self,
        request: &Arc<BidRequest>,
        campaigns: Vec<Campaign>,
    ) -> Vec<BidEntry> {
        let (tx, mut rx) = mpsc::channel(campaigns.len());
        let now = Local::now();

        for campaign in campaigns {
            let tx = tx.clone();
            let request = request.clone();
            let service = self.campaigns.clone();

            tokio::spawn(async move {
                if let Some(entry) = build_bid_entry(&service, &request, campaign, now).await {
                    let _ = tx.send(entry).await;
                }
            });
        }
        drop(tx);

        let mut entries = Vec::new();
        while let Some(entry) = rx.recv().await {
            entries.push(entry);
        }
        entries
    }

    fn build_response(
        &self,
        request: &BidRequest,
        winner: &BidEntry,
        final_price: f64,
    ) -> BidResponse {
        let mut bid = winner.bid.clone();
        bid.price = final_price;

        BidResponse {
            id: request.id.clone(),
            seatbid: vec![SeatBid {
                bid: vec![bid],
                seat: Some(self.seat.clone()),
                group: 0,
            }],
            bidid: Some(Uuid::new_v4().to_string()),
            cur: "USD".to_string(),
            nbr: 0,
            ext: None,
        }
    }

    async fn record_result(
        &self,
        request: &BidRequest,
        winner: &BidEntry,
        final_price: f64,
        second_price: f64,
        total_bids: usize,
        processing_time: Duration,
    ) {
        let result = AuctionResult {
            id: Uuid::new_v4(),
            bid_request_id: request.id.clone(),
            winning_bid_id: Uuid::parse_str(&winner.bid.id).ok(),
            winning_price: final_price,
            second_price,
            total_bids,
            auction_type: "second-price".to_string(),
            processing_time_ms: processing_time.as_millis() as i64,
            timestamp: Utc::now(),
        };

        if let Err(e) = self
            .cache
            .cache_auction_result(&request.id, &result, self.result_ttl)
            .await
        {
            error!(error = %e, request_id = %request.id, "Failed to cache auction result");
        }

        publish_json(self.bus.as_ref(), topics::AUCTION_RESULTS, &result);
    }
}

/// Evaluate one campaign against the request: targeting, frequency cap,
/// pacing sample, and floor check. Returns the bid entry when eligible.
async fn build_bid_entry(
    service: &CampaignService,
    request: &BidRequest,
    campaign: Campaign,
    now: DateTime<Local>,
) -> Option<BidEntry> {
    if !check_targeting(request, &campaign, now) {
        return None;
    }

    if let Some(user_id) = request.user_id() {
        match service
            .check_frequency_cap(user_id, &campaign, TrackingEventType::Impression)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(campaign_id = %campaign.id, "Frequency cap exceeded");
                return None;
            }
            Err(e) => {
                debug!(error = %e, campaign_id = %campaign.id, "Frequency cap check failed");
                return None;
            }
        }
    }

    let pacing = service.pacing_rate(&campaign, Utc::now());
    if rand::random::<f64>() > pacing {
        debug!(campaign_id = %campaign.id, rate = pacing, "Pacing check dropped bid");
        return None;
    }

    let bid_amount = calculate_bid_amount(&campaign, request);
    if bid_amount < request.imp[0].bidfloor {
        return None;
    }

    let bid = Bid {
        id: Uuid::new_v4().to_string(),
        impid: request.imp[0].id.clone(),
        price: bid_amount,
        adid: Some(campaign.id.to_string()),
        nurl: Some(format!(
            "/track/win?bid=${{AUCTION_PRICE}}&campaign={}",
            campaign.id
        )),
        iurl: Some(format!("/track/impression?campaign={}", campaign.id)),
        cid: Some(campaign.id.to_string()),
        crid: Some(format!("creative_{}", campaign.id)),
        adomain: vec!["example.com".to_string()],
        ext: None,
    };

    let score = calculate_bid_score(&campaign, bid_amount);

    Some(BidEntry {
        bid,
        campaign_id: campaign.id,
        score,
    })
}

/// Targeting match: every configured dimension must pass; an empty set on a
/// dimension means no constraint.
fn check_targeting(request: &BidRequest, campaign: &Campaign, now: DateTime<Local>) -> bool {
    let Some(rules) = &campaign.targeting_rules else {
        return true;
    };

    // A request with no geo data skips the geo filter and is still
    // evaluated on the remaining dimensions.
    if !rules.geo_targeting.is_empty() {
        if let Some(country) = request.country() {
            if !rules.geo_targeting.iter().any(|c| c == country) {
                return false;
            }
        }
    }

    if !rules.device_types.is_empty() {
        let device_type = request.device_type().unwrap_or(0).to_string();
        if !rules.device_types.iter().any(|d| *d == device_type) {
            return false;
        }
    }

    if !rules.day_parting.is_empty() {
        let day_of_week = now.weekday().num_days_from_sunday();
        let hour = now.hour();

        let allowed = rules.day_parting.iter().any(|rule| {
            rule.day_of_week == day_of_week && rule.start_hour <= hour && hour < rule.end_hour
        });
        if !allowed {
            return false;
        }
    }

    true
}

/// Base bid adjusted by multiplicative request-context boosts: 1.2x for
/// mobile (device type 1), 1.1x for a categorized site.
fn calculate_bid_amount(campaign: &Campaign, request: &BidRequest) -> f64 {
    let mut multiplier = 1.0;

    if request.device_type() == Some(1) {
        multiplier *= 1.2;
    }

    if request.has_site_category() {
        multiplier *= 1.1;
    }

    campaign.bid_amount * multiplier
}

/// Auction score: bid amount discounted by pricing-model confidence (a CPC
/// or CPA bid only pays if the priced event occurs) and by a near-exhausted
/// daily budget.
fn calculate_bid_score(campaign: &Campaign, bid_amount: f64) -> f64 {
    let mut score = bid_amount;

    match campaign.bid_type {
        BidType::Cpm => {}
        BidType::Cpc => score *= 0.8,
        BidType::Cpa => score *= 0.6,
    }

    if campaign.remaining_daily() < campaign.budget_daily * 0.2 {
        score *= 0.9;
    }

    score
}

/// Pick the highest-scoring entry; ties break by insertion order (stable
/// sort). The second price is the 2nd-ranked entry's price, or a synthetic
/// 80% of the winner's when it stands alone.
fn select_winner(entries: &mut [BidEntry]) -> Option<(BidEntry, f64)> {
    if entries.is_empty() {
        return None;
    }

    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let winner = entries[0].clone();

    let second_price = if entries.len() > 1 {
        entries[1].bid.price
    } else {
        winner.bid.price * 0.8
    };

    Some((winner, second_price))
}

/// Cleared price: one cent above the second price, clamped into
/// `[bid_floor, winning_bid]`.
fn determine_final_price(winning_bid: f64, second_price: f64, bid_floor: f64) -> f64 {
    let mut final_price = second_price + 0.01;

    if final_price < bid_floor {
        final_price = bid_floor;
    }

    if final_price > winning_bid {
        final_price = winning_bid;
    }

    final_price
}

#[cfg(test)]
mod tests {
    use super::*;
    use adserve_core::openrtb::{Device, Geo, Impression, Site, User};
    use adserve_core::types::{CampaignStatus, DayPartRule, TargetingRules};
    use chrono::TimeZone;

    fn sample_campaign(bid_amount: f64, bid_type: BidType) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            advertiser_id: "adv-1".to_string(),
            status: CampaignStatus::Active,
            budget_daily: 100.0,
            budget_total: 1000.0,
            spent_daily: 0.0,
            spent_total: 0.0,
            bid_type,
            bid_amount,
            targeting_rules: None,
            frequency_capping: None,
            start_date: now,
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_request(device_type: u32, country: Option<&str>, site_cat: bool) -> BidRequest {
        BidRequest {
            id: "req-1".to_string(),
            imp: vec![Impression {
                id: "imp-1".to_string(),
                banner: None,
                bidfloor: 0.5,
                bidfloorcur: "USD".to_string(),
                ext: None,
            }],
            site: site_cat.then(|| Site {
                id: None,
                domain: None,
                cat: Some(vec!["IAB1".to_string()]),
                page: None,
            }),
            app: None,
            device: Some(Device {
                ua: None,
                ip: None,
                geo: country.map(|c| Geo {
                    lat: None,
                    lon: None,
                    country: Some(c.to_string()),
                    region: None,
                    city: None,
                }),
                devicetype: Some(device_type),
                os: None,
                ifa: None,
            }),
            user: Some(User {
                id: Some("user-1".to_string()),
                buyeruid: None,
                keywords: None,
                ext: None,
            }),
            tmax: 100,
            at: 2,
            cur: vec!["USD".to_string()],
            ext: None,
        }
    }

    fn entry(price: f64, score: f64) -> BidEntry {
        BidEntry {
            bid: Bid {
                id: Uuid::new_v4().to_string(),
                impid: "imp-1".to_string(),
                price,
                adid: None,
                nurl: None,
                iurl: None,
                cid: None,
                crid: None,
                adomain: Vec::new(),
                ext: None,
            },
            campaign_id: Uuid::new_v4(),
            score,
        }
    }

    // 2024-03-04 is a Monday.
    fn monday_at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_select_winner_no_bids() {
        assert!(select_winner(&mut []).is_none());
    }

    #[test]
    fn test_select_winner_single_bid_synthesizes_second_price() {
        let mut entries = vec![entry(1.50, 1.50)];
        let (winner, second) = select_winner(&mut entries).unwrap();
        assert_eq!(winner.bid.price, 1.50);
        assert!((second - 1.20).abs() < 1e-9);
    }

    #[test]
    fn test_select_winner_multiple_bids() {
        let mut entries = vec![entry(1.00, 1.00), entry(2.00, 2.00), entry(1.50, 1.50)];
        let (winner, second) = select_winner(&mut entries).unwrap();
        assert_eq!(winner.bid.price, 2.00);
        assert_eq!(second, 1.50);
    }

    #[test]
    fn test_select_winner_ties_break_by_insertion_order() {
        let first = entry(1.00, 1.00);
        let first_id = first.bid.id.clone();
        let mut entries = vec![first, entry(1.00, 1.00)];
        let (winner, _) = select_winner(&mut entries).unwrap();
        assert_eq!(winner.bid.id, first_id);
    }

    #[test]
    fn test_final_price_second_plus_penny() {
        assert!((determine_final_price(2.00, 1.50, 1.00) - 1.51).abs() < 1e-9);
    }

    #[test]
    fn test_final_price_raised_to_floor() {
        assert_eq!(determine_final_price(2.00, 0.50, 1.00), 1.00);
    }

    #[test]
    fn test_final_price_capped_at_winning_bid() {
        assert_eq!(determine_final_price(1.50, 1.60, 1.00), 1.50);
    }

    #[test]
    fn test_two_campaign_auction_clears_at_second_price() {
        // Two CPM campaigns bidding 1.00 and 2.00 against a 0.50 floor:
        // the second campaign wins and pays 1.01.
        let mut entries = vec![entry(1.00, 1.00), entry(2.00, 2.00)];
        let (winner, second) = select_winner(&mut entries).unwrap();
        assert_eq!(second, 1.00);
        let cleared = determine_final_price(winner.bid.price, second, 0.50);
        assert!((cleared - 1.01).abs() < 1e-9);
    }

    #[test]
    fn test_uncontested_auction_clears_at_synthetic_floor() {
        let mut entries = vec![entry(1.00, 1.00)];
        let (winner, second) = select_winner(&mut entries).unwrap();
        let cleared = determine_final_price(winner.bid.price, second, 0.50);
        assert!((cleared - 0.81).abs() < 1e-9);
    }

    #[test]
    fn test_targeting_no_rules_always_matches() {
        let campaign = sample_campaign(1.0, BidType::Cpm);
        let request = sample_request(1, None, false);
        assert!(check_targeting(&request, &campaign, monday_at(12, 0)));
    }

    #[test]
    fn test_targeting_geo_match() {
        let mut campaign = sample_campaign(1.0, BidType::Cpm);
        campaign.targeting_rules = Some(TargetingRules {
            geo_targeting: vec!["US".to_string(), "CA".to_string()],
            ..Default::default()
        });

        let matching = sample_request(1, Some("US"), false);
        assert!(check_targeting(&matching, &campaign, monday_at(12, 0)));

        let elsewhere = sample_request(1, Some("UK"), false);
        assert!(!check_targeting(&elsewhere, &campaign, monday_at(12, 0)));
    }

    #[test]
    fn test_targeting_geo_skipped_without_geo_data() {
        let mut campaign = sample_campaign(1.0, BidType::Cpm);
        campaign.targeting_rules = Some(TargetingRules {
            geo_targeting: vec!["US".to_string()],
            ..Default::default()
        });

        // No device geo on the request: the geo dimension does not apply.
        let geoless = sample_request(1, None, false);
        assert!(check_targeting(&geoless, &campaign, monday_at(12, 0)));
    }

    #[test]
    fn test_targeting_device_type_stringified() {
        let mut campaign = sample_campaign(1.0, BidType::Cpm);
        campaign.targeting_rules = Some(TargetingRules {
            device_types: vec!["1".to_string(), "2".to_string()],
            ..Default::default()
        });

        assert!(check_targeting(
            &sample_request(1, None, false),
            &campaign,
            monday_at(12, 0)
        ));
        assert!(!check_targeting(
            &sample_request(4, None, false),
            &campaign,
            monday_at(12, 0)
        ));
    }

    #[test]
    fn test_targeting_day_parting_half_open_window() {
        let mut campaign = sample_campaign(1.0, BidType::Cpm);
        campaign.targeting_rules = Some(TargetingRules {
            day_parting: vec![DayPartRule {
                day_of_week: 1, // Monday
                start_hour: 9,
                end_hour: 17,
            }],
            ..Default::default()
        });
        let request = sample_request(1, None, false);

        assert!(!check_targeting(&request, &campaign, monday_at(8, 59)));
        assert!(check_targeting(&request, &campaign, monday_at(9, 0)));
        assert!(check_targeting(&request, &campaign, monday_at(16, 59)));
        assert!(!check_targeting(&request, &campaign, monday_at(17, 0)));
    }

    #[test]
    fn test_targeting_day_parting_empty_interval_never_matches() {
        let mut campaign = sample_campaign(1.0, BidType::Cpm);
        campaign.targeting_rules = Some(TargetingRules {
            day_parting: vec![DayPartRule {
                day_of_week: 1,
                start_hour: 9,
                end_hour: 9,
            }],
            ..Default::default()
        });
        let request = sample_request(1, None, false);

        assert!(!check_targeting(&request, &campaign, monday_at(9, 0)));
    }

    #[test]
    fn test_bid_amount_base_only() {
        let campaign = sample_campaign(1.00, BidType::Cpm);
        let request = sample_request(2, None, false);
        assert!((calculate_bid_amount(&campaign, &request) - 1.00).abs() < 1e-9);
    }

    #[test]
    fn test_bid_amount_mobile_multiplier() {
        let campaign = sample_campaign(1.00, BidType::Cpm);
        let request = sample_request(1, None, false);
        assert!((calculate_bid_amount(&campaign, &request) - 1.20).abs() < 1e-9);
    }

    #[test]
    fn test_bid_amount_site_category_multiplier() {
        let campaign = sample_campaign(1.00, BidType::Cpm);
        let request = sample_request(2, None, true);
        assert!((calculate_bid_amount(&campaign, &request) - 1.10).abs() < 1e-9);
    }

    #[test]
    fn test_bid_amount_combined_multipliers() {
        let campaign = sample_campaign(1.00, BidType::Cpm);
        let request = sample_request(1, None, true);
        assert!((calculate_bid_amount(&campaign, &request) - 1.32).abs() < 1e-9);
    }

    #[test]
    fn test_score_discounts_performance_pricing() {
        assert_eq!(
            calculate_bid_score(&sample_campaign(1.0, BidType::Cpm), 1.0),
            1.0
        );
        assert!(
            (calculate_bid_score(&sample_campaign(1.0, BidType::Cpc), 1.0) - 0.8).abs() < 1e-9
        );
        assert!(
            (calculate_bid_score(&sample_campaign(1.0, BidType::Cpa), 1.0) - 0.6).abs() < 1e-9
        );
    }

    #[test]
    fn test_score_discounts_nearly_exhausted_daily_budget() {
        let mut campaign = sample_campaign(1.0, BidType::Cpm);
        campaign.spent_daily = 85.0; // 15% remaining, under the 20% line
        assert!((calculate_bid_score(&campaign, 1.0) - 0.9).abs() < 1e-9);
    }
}
