//! Message bus publisher
//!
//! Drains the outbox to an external ordered topic so downstream systems
//! outside this service can react to wallet events. Publishing failures
//! never advance the consumer cursor — the batch is retried next tick.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::time::interval;

use crate::outbox::{Outbox, OutboxError, OutboxMessage};

pub const TOPIC_EVENTS: &str = "wallet-events";
pub const TOPIC_DLQ: &str = "wallet-events-dlq";
const CONSUMER_NAME: &str = "bus-publisher";

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ensure the topics this service owns exist, creating only those missing.
pub async fn provision_topics(brokers: &str) -> Result<(), BusError> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()?;

    let events_retention_ms = (7 * 24 * 60 * 60 * 1000).to_string();
    let events_topic = NewTopic::new(TOPIC_EVENTS, 10, TopicReplication::Fixed(1))
        .set("retention.ms", &events_retention_ms)
        .set("compression.type", "gzip");

    let dlq_retention_ms = (30 * 24 * 60 * 60 * 1000).to_string();
    let dlq_topic = NewTopic::new(TOPIC_DLQ, 5, TopicReplication::Fixed(1))
        .set("retention.ms", &dlq_retention_ms);

    let results = admin
        .create_topics(&[events_topic, dlq_topic], &AdminOptions::new())
        .await?;

    for result in results {
        match result {
            Ok(topic) => tracing::info!(topic, "topic provisioned"),
            Err((topic, err)) => {
                // ALREADY_EXISTS is the expected steady-state outcome.
                tracing::debug!(topic, error = %err, "topic already present or provisioning skipped");
            }
        }
    }

    Ok(())
}

fn build_producer(brokers: &str, client_id: &str) -> Result<FutureProducer, BusError> {
    let producer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("client.id", client_id)
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set("compression.type", "gzip")
        .create()?;
    Ok(producer)
}

pub struct BusPublisher {
    outbox: Outbox,
    producer: FutureProducer,
    batch_size: i64,
}

impl BusPublisher {
    pub fn new(
        pool: sqlx::PgPool,
        brokers: &str,
        client_id: &str,
        batch_size: i64,
    ) -> Result<Self, BusError> {
        Ok(Self {
            outbox: Outbox::new(pool),
            producer: build_producer(brokers, client_id)?,
            batch_size,
        })
    }

    pub fn start(self: Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(poll_interval).await;
        })
    }

    async fn run(&self, poll_interval: Duration) {
        tracing::info!("bus publisher started");
        let mut ticker = interval(poll_interval);

        loop {
            ticker.tick().await;
            if let Err(e) = self.publish_batch().await {
                tracing::error!(error = %e, "bus publish batch failed, retrying next tick");
            }
        }
    }

    /// Claim a batch, publish each message, and only ack the batch if every
    /// publish in it succeeded.
    pub async fn publish_batch(&self) -> Result<usize, BusError> {
        let claimed = self.outbox.claim_batch(CONSUMER_NAME, self.batch_size).await?;
        if claimed.messages.is_empty() {
            return Ok(0);
        }

        let mut published_ids = Vec::with_capacity(claimed.messages.len());
        for message in &claimed.messages {
            match self.publish_one(message).await {
                Ok(()) => published_ids.push(message.id),
                Err(e) => {
                    tracing::error!(
                        outbox_id = message.id,
                        error = %e,
                        "publish failed, aborting batch iteration"
                    );
                    break;
                }
            }
        }

        let published = published_ids.len();
        claimed.mark_processed(&published_ids, CONSUMER_NAME).await?;

        Ok(published)
    }

    async fn publish_one(&self, message: &OutboxMessage) -> Result<(), BusError> {
        let value = serde_json::to_string(&BusMessageBody {
            id: message.id,
            aggregate_id: &message.aggregate_id,
            event_type: &message.event_type,
            event_version: message.event_version,
            payload: &message.payload,
        })?;

        let mut headers = rdkafka::message::OwnedHeaders::new()
            .insert(rdkafka::message::Header {
                key: "event-type",
                value: Some(&message.event_type),
            })
            .insert(rdkafka::message::Header {
                key: "aggregate-id",
                value: Some(&message.aggregate_id),
            });
        if let Some(correlation_id) = &message.correlation_id {
            headers = headers.insert(rdkafka::message::Header {
                key: "correlation-id",
                value: Some(correlation_id),
            });
        }
        if let Some(causation_id) = &message.causation_id {
            headers = headers.insert(rdkafka::message::Header {
                key: "causation-id",
                value: Some(causation_id),
            });
        }

        let record = FutureRecord::to(TOPIC_EVENTS)
            .key(&message.aggregate_id)
            .payload(&value)
            .headers(headers);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| BusError::Kafka(err))?;

        Ok(())
    }
}

#[derive(serde::Serialize)]
struct BusMessageBody<'a> {
    id: i64,
    aggregate_id: &'a str,
    event_type: &'a str,
    event_version: i64,
    payload: &'a serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_match_provisioning_plan() {
        assert_eq!(TOPIC_EVENTS, "wallet-events");
        assert_eq!(TOPIC_DLQ, "wallet-events-dlq");
    }

    #[test]
    fn bus_message_body_serializes_with_flat_fields() {
        let body = BusMessageBody {
            id: 1,
            aggregate_id: "w1",
            event_type: "WalletCredited",
            event_version: 2,
            payload: &serde_json::json!({"amount": 500}),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["aggregate_id"], "w1");
        assert_eq!(value["event_version"], 2);
    }
}
