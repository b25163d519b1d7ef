//! `LISTEN/NOTIFY` wrapper around the `notification_schedule_changes`
//! channel: owns a pool, exposes a `broadcast::Receiver` to subscribers, and
//! runs a reconnect-with-backoff loop in a spawned task.
//!
//! Lossy by design: a full broadcast channel or zero subscribers silently
//! drops notifications. The scheduler loop's own safety timeout is the
//! reconciliation floor, not this channel.

use std::sync::Arc;
use std::time::Duration;

use nsched_schemas::NotifyPayload;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Postgres channel the `notify_schedule_change()` trigger publishes on.
pub const SCHEDULE_CHANGE_CHANNEL: &str = "notification_schedule_changes";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 256;

/// Owns a `PgPool` and forwards `notification_schedule_changes` NOTIFY
/// payloads to any number of subscribers via a broadcast channel.
pub struct ScheduleChangeListener {
    pool: PgPool,
    sender: broadcast::Sender<NotifyPayload>,
}

impl ScheduleChangeListener {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let (sender, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { pool, sender }
    }

    /// Subscribe to change notifications. Multiple subscribers receive
    /// independent copies of every notification sent after they subscribe.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NotifyPayload> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Start the background listen loop. Runs until the process exits or an
    /// unrecoverable error occurs; transient connection errors reconnect
    /// after [`RECONNECT_DELAY`].
    #[instrument(skip(self), name = "schedule_change_listener")]
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("starting schedule change listener");

        tokio::spawn(async move {
            loop {
                match self.listen_loop().await {
                    Ok(()) => {
                        info!("schedule change listener stopped gracefully");
                        break;
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            delay_secs = RECONNECT_DELAY.as_secs(),
                            "schedule change listener error, reconnecting"
                        );
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        })
    }

    async fn listen_loop(&self) -> Result<(), ListenerError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(SCHEDULE_CHANGE_CHANNEL).await?;

        info!(channel = SCHEDULE_CHANGE_CHANNEL, "listening for schedule changes");

        loop {
            let notification = listener.recv().await?;
            let payload = notification.payload();

            debug!(payload = %payload, "received schedule change NOTIFY");

            match serde_json::from_str::<NotifyPayload>(payload) {
                Ok(parsed) => {
                    if self.sender.send(parsed).is_err() {
                        warn!("no subscribers for schedule change event");
                    }
                }
                Err(e) => {
                    warn!(error = %e, payload = %payload, "failed to parse NOTIFY payload");
                }
            }
        }
    }
}

/// Errors surfaced by the listener's background loop. Distinguished from
/// the store's [`crate::ScheduleStoreError`] because the listener is a
/// read-only, reconnect-forever component — any error here is transient by
/// construction.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
