use super::MessageSink;
use crate::error::{RecommendationError, Result};
use crate::messages::OutboundMessage;
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, info};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Publishes recommendation messages to a Kafka topic, keyed by user id.
pub struct KafkaMessageSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaMessageSink {
    /// Create a new Kafka sink.
    ///
    /// The producer is configured with idempotence so a message is written
    /// at most once per send even when the client retries internally.
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .create()
            .map_err(|e| RecommendationError::Configuration(format!("Kafka producer: {}", e)))?;

        let topic = topic.into();
        info!(brokers = brokers, topic = %topic, "KafkaMessageSink initialized");

        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl MessageSink for KafkaMessageSink {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let key = message.key();

        let headers = OwnedHeaders::new().insert(Header {
            key: "message_type",
            value: Some(message.message_type().as_bytes()),
        });

        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .payload(&payload)
            .headers(headers);

        self.producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(err, _)| {
                RecommendationError::Publish(format!("Kafka publish failed: {}", err))
            })?;

        debug!(key = %key, topic = %self.topic, "Message delivered");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.producer
            .flush(DELIVERY_TIMEOUT)
            .map_err(|e| RecommendationError::Publish(format!("Kafka flush failed: {}", e)))
    }
}
