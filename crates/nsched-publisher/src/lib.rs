//! Event Publisher Adapter: translates a claimed schedule row into a typed
//! event and hands it to the external bus with at-least-once semantics.
//!
//! [`InMemoryPublisher`] is both the test double and a valid production
//! backend for single-process deployments with no downstream bus.
//! [`KafkaPublisher`] is the production backend, feature-gated behind `bus`
//! so the rest of the workspace builds and tests without a broker present.

use std::sync::Mutex;

use async_trait::async_trait;
use nsched_schemas::{EventEnvelope, NotificationKind};
use uuid::Uuid;

#[cfg(feature = "bus")]
pub mod kafka;

#[cfg(feature = "bus")]
pub use kafka::KafkaPublisher;

/// Deterministic dedup key for a claimed row. Downstream consumers must
/// treat duplicate keys as idempotent, since the publish-then-mark-sent
/// sequence admits duplicate delivery on crash between the two steps.
pub fn dedup_key(row_id: Uuid, kind: NotificationKind) -> String {
    format!("{row_id}:{}", kind.as_str())
}

/// Errors the adapter can report. `Saturated` never blocks inside `publish`
/// — the caller (the scheduler loop) backs off its *next iteration* instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("broker reports saturation/backpressure")]
    Saturated,
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("failed to serialize event envelope: {0}")]
    Serialization(String),
}

/// The sink the Scheduler Loop hands dispatched rows to. `ok` ⇒ caller marks
/// the row sent; `err` ⇒ caller leaves the row unchanged for a later
/// iteration to reclaim.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError>;
}

/// Test double: an in-memory `Mutex<Vec<EventEnvelope>>` plus optional
/// scripted failure/backpressure injection.
#[derive(Default)]
pub struct InMemoryPublisher {
    published: Mutex<Vec<EventEnvelope>>,
    fail_next: Mutex<u32>,
    saturate_next: Mutex<u32>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` `publish` calls to fail with `Unreachable`.
    pub fn fail_next(&self, n: u32) {
        *self.fail_next.lock().expect("fail_next lock poisoned") = n;
    }

    /// Script the next `n` `publish` calls to fail with `Saturated`.
    pub fn saturate_next(&self, n: u32) {
        *self.saturate_next.lock().expect("saturate_next lock poisoned") = n;
    }

    /// All envelopes successfully published so far, in publish order.
    pub fn dispatched(&self) -> Vec<EventEnvelope> {
        self.published.lock().expect("published lock poisoned").clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        {
            let mut saturate = self.saturate_next.lock().expect("saturate_next lock poisoned");
            if *saturate > 0 {
                *saturate -= 1;
                return Err(PublishError::Saturated);
            }
        }
        {
            let mut fail = self.fail_next.lock().expect("fail_next lock poisoned");
            if *fail > 0 {
                *fail -= 1;
                return Err(PublishError::Unreachable("scripted failure".to_string()));
            }
        }

        self.published
            .lock()
            .expect("published lock poisoned")
            .push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            event: "game.reminder_due".to_string(),
            dedup_key: "x:reminder".to_string(),
            game_id: Uuid::new_v4(),
            kind: "reminder".to_string(),
            offset_minutes: Some(60),
            scheduled_for: Utc::now(),
        }
    }

    #[test]
    fn dedup_key_matches_row_and_kind() {
        let id = Uuid::new_v4();
        assert_eq!(dedup_key(id, NotificationKind::Reminder), format!("{id}:reminder"));
    }

    #[tokio::test]
    async fn in_memory_publisher_records_successful_publishes() {
        let publisher = InMemoryPublisher::new();
        publisher.publish(&envelope()).await.unwrap();
        publisher.publish(&envelope()).await.unwrap();
        assert_eq!(publisher.dispatched().len(), 2);
    }

    #[tokio::test]
    async fn fail_next_scripts_exactly_n_failures() {
        let publisher = InMemoryPublisher::new();
        publisher.fail_next(2);
        assert!(publisher.publish(&envelope()).await.is_err());
        assert!(publisher.publish(&envelope()).await.is_err());
        assert!(publisher.publish(&envelope()).await.is_ok());
        assert_eq!(publisher.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn saturate_next_reports_saturated_not_unreachable() {
        let publisher = InMemoryPublisher::new();
        publisher.saturate_next(1);
        let err = publisher.publish(&envelope()).await.unwrap_err();
        assert!(matches!(err, PublishError::Saturated));
    }
}
