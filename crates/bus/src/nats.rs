//! NATS publisher implementing the core [`EventBus`] trait.
//!
//! Publishes are detached onto the runtime so the auction and tracking hot
//! paths never wait on the broker. Delivery is at-least-once per topic with
//! no cross-topic ordering guarantee; consumers live out of process.

use adserve_core::config::NatsConfig;
use adserve_core::event_bus::EventBus;
use tracing::{debug, error, info};

pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the first configured NATS server.
    pub async fn connect(config: &NatsConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "nats://localhost:4222".to_string());

        info!(url = %url, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .max_reconnects(Some(config.max_reconnects))
            .connect(&url)
            .await?;

        info!("NATS connection established");

        Ok(Self { client })
    }
}

impl EventBus for NatsBus {
    fn publish(&self, topic: &'static str, payload: serde_json::Value) {
        let client = self.client.clone();
        tokio::spawn(async move {
            let bytes = payload.to_string();
            match client.publish(topic.to_string(), bytes.into()).await {
                Ok(_) => {
                    metrics::counter!("bus.published", "topic" => topic).increment(1);
                    debug!(topic = topic, "Event published");
                }
                Err(e) => {
                    metrics::counter!("bus.publish_errors", "topic" => topic).increment(1);
                    error!(error = %e, topic = topic, "Failed to publish event");
                }
            }
        });
    }
}
