//! Production `EventPublisher` backend over `rdkafka::producer::FutureProducer`.
//!
//! One topic per `NotificationKind` group, matching the envelope's `event`
//! field (`game.reminder_due`, `game.status_transition_due`,
//! `game.join_announcement_due`). Feature-gated behind `bus` so the rest of
//! the workspace builds and tests without a broker present.

use std::time::Duration;

use async_trait::async_trait;
use nsched_schemas::EventEnvelope;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{instrument, warn};

use crate::{EventPublisher, PublishError};

/// Publishes envelopes to Kafka, one topic per `envelope.event` name.
pub struct KafkaPublisher {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaPublisher {
    /// Build a producer from a `bootstrap.servers` connection string.
    pub fn connect(bootstrap_servers: &str) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            send_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    #[instrument(skip(self, envelope), fields(event = %envelope.event, dedup_key = %envelope.dedup_key))]
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let payload = serde_json::to_string(envelope)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;

        let record = FutureRecord::to(&envelope.event)
            .key(&envelope.dedup_key)
            .payload(&payload);

        match self.producer.send(record, self.send_timeout).await {
            Ok(_) => Ok(()),
            Err((KafkaError::MessageProduction(code), _)) if is_saturation(code) => {
                warn!(?code, "kafka reports saturation, backing off next loop iteration");
                Err(PublishError::Saturated)
            }
            Err((e, _)) => Err(PublishError::Unreachable(e.to_string())),
        }
    }
}

fn is_saturation(code: rdkafka::types::RDKafkaErrorCode) -> bool {
    matches!(
        code,
        rdkafka::types::RDKafkaErrorCode::QueueFull
            | rdkafka::types::RDKafkaErrorCode::OutOfOrderSequenceNumber
    )
}
