//! Tracking pipeline.
//!
//! Ingress validates and counts an event in the cache, then hands it to a
//! bounded buffer. A worker pool drains the buffer one row at a time while
//! a periodic flusher moves up to a batch per tick through a single
//! transaction. When the buffer is full the event is written inline on the
//! ingress path instead — back-pressure by downgrade, never by loss.
//!
//! A persistence failure after counting leaves the cache ahead of the
//! durable store; the cache is authoritative for live decisions.

use adserve_cache::RedisStore;
use adserve_campaigns::CampaignService;
use adserve_core::config::TrackingConfig;
use adserve_core::error::{AdServeError, AdServeResult};
use adserve_core::event_bus::{publish_json, topics, EventBus};
use adserve_core::types::{BidType, CampaignStatus, TrackingEvent, TrackingEventType};
use adserve_store::EventStore;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct TrackingService {
    events: Arc<EventStore>,
    cache: Arc<RedisStore>,
    campaigns: Arc<CampaignService>,
    bus: Arc<dyn EventBus>,
    sender: Mutex<Option<mpsc::Sender<TrackingEvent>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<TrackingEvent>>>,
    workers: usize,
    batch_size: usize,
    flush_interval: Duration,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TrackingService {
    pub fn new(
        events: Arc<EventStore>,
        cache: Arc<RedisStore>,
        campaigns: Arc<CampaignService>,
        bus: Arc<dyn EventBus>,
        config: &TrackingConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.buffer_size);

        Self {
            events,
            cache,
            campaigns,
            bus,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            workers: config.workers,
            batch_size: config.batch_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool and the periodic batch flusher.
    pub fn start(&self) {
        let mut handles = self.handles.lock().expect("tracking handle mutex poisoned");

        for worker_id in 0..self.workers {
            let events = self.events.clone();
            let receiver = self.receiver.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let event = { receiver.lock().await.recv().await };
                    match event {
                        Some(event) => {
                            if let Err(e) = events.insert(&event).await {
                                error!(error = %e, event_id = %event.id, "Failed to persist event");
                            }
                        }
                        None => {
                            debug!(worker_id = worker_id, "Tracking worker draining complete");
                            break;
                        }
                    }
                }
            }));
        }

        let events = self.events.clone();
        let receiver = self.receiver.clone();
        let batch_size = self.batch_size;
        let flush_interval = self.flush_interval;

        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);

            loop {
                interval.tick().await;

                let mut batch = Vec::with_capacity(batch_size);
                let closed = {
                    let mut rx = receiver.lock().await;
                    loop {
                        if batch.len() >= batch_size {
                            break false;
                        }
                        match rx.try_recv() {
                            Ok(event) => batch.push(event),
                            Err(mpsc::error::TryRecvError::Empty) => break false,
                            Err(mpsc::error::TryRecvError::Disconnected) => break true,
                        }
                    }
                };

                if !batch.is_empty() {
                    match events.insert_batch(&batch).await {
                        Ok(_) => {
                            metrics::counter!("tracking.flushed").increment(batch.len() as u64);
                            debug!(count = batch.len(), "Tracking batch flushed");
                        }
                        Err(e) => {
                            metrics::counter!("tracking.flush_errors").increment(1);
                            error!(error = %e, count = batch.len(), "Failed to flush tracking batch");
                        }
                    }
                }

                if closed {
                    break;
                }
            }
        }));

        info!(workers = self.workers, "Tracking pipeline started");
    }

    /// Close the buffer and wait for the workers to flush the remainder.
    pub async fn stop(&self) {
        drop(
            self.sender
                .lock()
                .expect("tracking sender mutex poisoned")
                .take(),
        );

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().expect("tracking handle mutex poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Tracking task panicked");
            }
        }

        info!("Tracking pipeline stopped");
    }

    // ─── Ingress ───────────────────────────────────────────────────────────

    pub async fn track_impression(&self, event: TrackingEvent) -> AdServeResult<TrackingEvent> {
        self.track(event, TrackingEventType::Impression).await
    }

    pub async fn track_click(&self, event: TrackingEvent) -> AdServeResult<TrackingEvent> {
        self.track(event, TrackingEventType::Click).await
    }

    pub async fn track_conversion(&self, event: TrackingEvent) -> AdServeResult<TrackingEvent> {
        self.track(event, TrackingEventType::Conversion).await
    }

    async fn track(
        &self,
        mut event: TrackingEvent,
        event_type: TrackingEventType,
    ) -> AdServeResult<TrackingEvent> {
        let start = Instant::now();

        event.id = Uuid::new_v4();
        event.event_type = event_type;
        event.timestamp = Utc::now();

        self.validate_and_enrich(&mut event).await?;

        metrics::counter!(counter_name(event_type)).increment(1);

        if let Err(e) = self
            .cache
            .increment_metric(event_type.metric_kind(), event.campaign_id)
            .await
        {
            error!(error = %e, campaign_id = %event.campaign_id, "Failed to increment metric in cache");
        }

        if !event.user_id.is_empty() && counts_toward_cap(event_type) {
            // The campaign snapshot carries the cap rule and its window.
            match self.campaigns.get(event.campaign_id).await {
                Ok(campaign) => {
                    if let Err(e) = self
                        .campaigns
                        .increment_frequency_cap(&event.user_id, &campaign, event_type)
                        .await
                    {
                        error!(error = %e, "Failed to increment frequency cap");
                    }
                }
                Err(e) => error!(error = %e, "Failed to load campaign for frequency cap"),
            }
        }

        self.enqueue(&event).await?;

        publish_json(self.bus.as_ref(), topic_for(event_type), &event);

        metrics::histogram!("tracking.duration_us", "type" => event_type.as_str())
            .record(start.elapsed().as_micros() as f64);

        Ok(event)
    }

    /// Validation and performance-pricing debit. The debit happens before
    /// the event is counted or persisted: a refused debit drops the event
    /// entirely, preserving at-most-one billing.
    async fn validate_and_enrich(&self, event: &mut TrackingEvent) -> AdServeResult<()> {
        if event.campaign_id.is_nil() {
            return Err(AdServeError::Validation("invalid campaign id".into()));
        }

        let campaign = self.campaigns.get(event.campaign_id).await?;

        if campaign.status != CampaignStatus::Active {
            return Err(AdServeError::Validation("campaign is not active".into()));
        }

        if matches!(
            event.event_type,
            TrackingEventType::Click | TrackingEventType::Conversion
        ) {
            event.price = campaign.bid_amount;

            if debit_required(campaign.bid_type, event.event_type) {
                let allowed = self
                    .campaigns
                    .try_commit_budget(campaign.id, event.price)
                    .await?;
                if !allowed {
                    metrics::counter!("tracking.budget_exceeded").increment(1);
                    return Err(AdServeError::BudgetExceeded(format!(
                        "campaign {}",
                        campaign.id
                    )));
                }
            }
        }

        Ok(())
    }

    async fn enqueue(&self, event: &TrackingEvent) -> AdServeResult<()> {
        let sender = self
            .sender
            .lock()
            .expect("tracking sender mutex poisoned")
            .clone();

        let Some(sender) = sender else {
            return Err(AdServeError::Unavailable("tracking pipeline stopped".into()));
        };

        match sender.try_send(event.clone()) {
            Ok(_) => {
                metrics::counter!("tracking.queued").increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::counter!("tracking.inlined").increment(1);
                warn!("Event buffer full, processing synchronously");
                self.events.insert(&event).await?;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(AdServeError::Unavailable("tracking pipeline stopped".into()))
            }
        }
    }

    // ─── Queries ───────────────────────────────────────────────────────────

    /// Historical event counts by type over a time range.
    pub async fn event_stats(
        &self,
        campaign_id: Uuid,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
    ) -> AdServeResult<std::collections::HashMap<String, i64>> {
        Ok(self.events.counts_by_type(campaign_id, start, end).await?)
    }

    /// Today's live counters combined with canonical spend.
    pub async fn real_time_metrics(
        &self,
        campaign_id: Uuid,
    ) -> AdServeResult<adserve_core::types::CampaignMetrics> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        self.campaigns.metrics(campaign_id, &date).await
    }
}

/// Whether this event bills against the campaign budget: CPC campaigns pay
/// per click, CPA per conversion; CPM was charged at auction time.
fn debit_required(bid_type: BidType, event_type: TrackingEventType) -> bool {
    matches!(
        (bid_type, event_type),
        (BidType::Cpc, TrackingEventType::Click) | (BidType::Cpa, TrackingEventType::Conversion)
    )
}

/// Only impressions and clicks count toward frequency caps.
fn counts_toward_cap(event_type: TrackingEventType) -> bool {
    matches!(
        event_type,
        TrackingEventType::Impression | TrackingEventType::Click
    )
}

fn counter_name(event_type: TrackingEventType) -> &'static str {
    match event_type {
        TrackingEventType::Impression => "tracking.impressions",
        TrackingEventType::Click => "tracking.clicks",
        TrackingEventType::Conversion => "tracking.conversions",
        TrackingEventType::Viewable => "tracking.viewables",
    }
}

fn topic_for(event_type: TrackingEventType) -> &'static str {
    match event_type {
        TrackingEventType::Impression => topics::IMPRESSIONS,
        TrackingEventType::Click => topics::CLICKS,
        TrackingEventType::Conversion => topics::CONVERSIONS,
        TrackingEventType::Viewable => topics::IMPRESSIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debit_required_only_for_matching_pricing() {
        assert!(debit_required(BidType::Cpc, TrackingEventType::Click));
        assert!(debit_required(BidType::Cpa, TrackingEventType::Conversion));

        assert!(!debit_required(BidType::Cpm, TrackingEventType::Click));
        assert!(!debit_required(BidType::Cpm, TrackingEventType::Impression));
        assert!(!debit_required(BidType::Cpc, TrackingEventType::Conversion));
        assert!(!debit_required(BidType::Cpa, TrackingEventType::Click));
        assert!(!debit_required(BidType::Cpc, TrackingEventType::Impression));
    }

    #[test]
    fn test_conversions_never_count_toward_caps() {
        assert!(counts_toward_cap(TrackingEventType::Impression));
        assert!(counts_toward_cap(TrackingEventType::Click));
        assert!(!counts_toward_cap(TrackingEventType::Conversion));
        assert!(!counts_toward_cap(TrackingEventType::Viewable));
    }

    #[test]
    fn test_event_counter_names() {
        assert_eq!(
            counter_name(TrackingEventType::Impression),
            "tracking.impressions"
        );
        assert_eq!(counter_name(TrackingEventType::Click), "tracking.clicks");
        assert_eq!(
            counter_name(TrackingEventType::Conversion),
            "tracking.conversions"
        );
    }

    #[test]
    fn test_event_topics() {
        assert_eq!(topic_for(TrackingEventType::Impression), topics::IMPRESSIONS);
        assert_eq!(topic_for(TrackingEventType::Click), topics::CLICKS);
        assert_eq!(
            topic_for(TrackingEventType::Conversion),
            topics::CONVERSIONS
        );
    }
}
