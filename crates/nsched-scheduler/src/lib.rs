//! Scheduler Loop: the single-consumer event loop advancing the schedule
//! forward in time via `INIT -> QUERY -> WAIT -> DISPATCH -> MARK -> QUERY
//! ...`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use nsched_config::SchedulerConfig;
use nsched_db::ScheduleChangeListener;
use nsched_publisher::{dedup_key, EventPublisher, PublishError};
use nsched_schemas::{EventEnvelope, NotifyPayload};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub mod clock;
pub mod status;

pub use clock::{Clock, FixedClock, SystemClock};

/// The five-state loop's current state, recorded for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Query,
    Wait,
    Dispatch,
    Mark,
}

/// Why a WAIT iteration ended, recorded for observability.
#[derive(Debug, Clone)]
pub enum WakeCause {
    TimerElapsed,
    Notified(NotifyPayload),
    SafetyTimeout,
    Shutdown,
}

/// The three error kinds this component distinguishes at its boundary.
/// `Transient` and `PerRow` never propagate out of [`run`] — they
/// are logged and only affect the loop's next iteration. `Fatal` is the one
/// variant `run` actually returns, causing the daemon to exit non-zero and
/// restart externally.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("transient error: {0}")]
    Transient(String),
    #[error("per-row error for {row_id}: {cause}")]
    PerRow { row_id: Uuid, cause: String },
    #[error("fatal scheduler error: {0}")]
    Fatal(String),
}

/// Pure helper: how long QUERY should wait before the next forced wake-up,
/// given the earliest due row (if any). `small_lead` keeps the loop from
/// oversleeping past the target.
fn compute_wait(
    next_due: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cfg: &SchedulerConfig,
) -> StdDuration {
    match next_due {
        None => StdDuration::from_secs(cfg.safety_timeout_secs.max(0) as u64),
        Some(due) => {
            let lead = ChronoDuration::seconds(cfg.small_lead_secs.max(0));
            let raw = due - now - lead;
            StdDuration::from_millis(raw.num_milliseconds().max(0) as u64)
        }
    }
}

/// Build the dead-letter error envelope published when a row exhausts its
/// retry budget.
fn dead_letter_envelope(dedup: &str, game_id: Uuid, kind: &str) -> EventEnvelope {
    EventEnvelope {
        event: "game.schedule_dead_letter".to_string(),
        dedup_key: dedup.to_string(),
        game_id,
        kind: kind.to_string(),
        offset_minutes: None,
        scheduled_for: Utc::now(),
    }
}

/// Outcome of one DISPATCH+MARK pass, for callers that drive the loop
/// step-by-step (`nsched-testkit::SchedulerHarness::advance`).
#[derive(Debug, Default, Clone)]
pub struct DispatchOutcome {
    pub dispatched: Vec<Uuid>,
    pub dead_lettered: Vec<Uuid>,
    pub saturated: bool,
}

/// Claim whatever is due as of `now`, publish each row, and mark it sent or
/// dead-lettered, committing one transaction. This is the DISPATCH+MARK half
/// of the loop, extracted so `run` and `SchedulerHarness::advance` share one
/// implementation instead of the harness re-deriving it.
#[instrument(skip(pool, publisher, cfg, retry_counts), fields(now = %now))]
pub async fn dispatch_once(
    pool: &PgPool,
    publisher: &Arc<dyn EventPublisher>,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
    retry_counts: &mut HashMap<Uuid, u32>,
) -> Result<DispatchOutcome, SchedulerError> {
    let db_timeout = StdDuration::from_secs(cfg.db_call_timeout_secs);
    let grace = ChronoDuration::seconds(cfg.grace_window_secs.max(0));

    let mut tx = tokio::time::timeout(db_timeout, pool.begin())
        .await
        .map_err(|_| SchedulerError::Transient("opening dispatch transaction timed out".into()))?
        .map_err(|e| SchedulerError::Transient(format!("begin failed: {e}")))?;

    let claimed = tokio::time::timeout(db_timeout, nsched_db::claim_due(&mut tx, now, grace, cfg.batch_limit))
        .await
        .map_err(|_| SchedulerError::Transient("claim_due timed out".into()))?
        .map_err(|e| SchedulerError::Transient(format!("claim_due failed: {e}")))?;

    let mut outcome = DispatchOutcome::default();

    for row in &claimed {
        let envelope = EventEnvelope::for_row(row);
        let publish_result = tokio::time::timeout(db_timeout, publisher.publish(&envelope)).await;

        let result = match publish_result {
            Ok(inner) => inner,
            Err(_) => Err(PublishError::Unreachable("publish timed out".to_string())),
        };

        match result {
            Ok(()) => {
                retry_counts.remove(&row.id);
                if let Err(e) = nsched_db::mark_sent(&mut tx, row.id).await {
                    warn!(row_id = %row.id, error = %e, "mark_sent failed");
                } else {
                    outcome.dispatched.push(row.id);
                }
            }
            Err(PublishError::Saturated) => {
                outcome.saturated = true;
                info!(row_id = %row.id, "publish reported saturation, row reclaimed next iteration");
            }
            Err(e) => {
                let count = retry_counts.entry(row.id).or_insert(0);
                *count += 1;
                warn!(row_id = %row.id, error = %e, attempt = *count, "publish failed");

                if *count > cfg.max_row_retries {
                    warn!(row_id = %row.id, "retry budget exhausted, moving to dead-letter");
                    if let Err(dl_err) = nsched_db::mark_dead_letter(&mut tx, row.id).await {
                        warn!(row_id = %row.id, error = %dl_err, "mark_dead_letter failed");
                    } else {
                        outcome.dead_lettered.push(row.id);
                        let dl = dead_letter_envelope(
                            &dedup_key(row.id, row.kind),
                            row.game_id,
                            row.kind.as_str(),
                        );
                        let _ = publisher.publish(&dl).await;
                    }
                    retry_counts.remove(&row.id);
                }
                // Below the retry cap: the row's `sent` flag is left
                // untouched; it is reclaimed on the next iteration once the
                // transaction below commits and the lock releases.
            }
        }
    }

    tx.commit()
        .await
        .map_err(|e| SchedulerError::Transient(format!("dispatch transaction commit failed: {e}")))?;

    Ok(outcome)
}

/// Run the scheduler loop until `shutdown` is cancelled. Every database and
/// publisher call is wrapped in a per-call timeout; an in-flight DISPATCH
/// transaction is allowed to finish and commit before the loop returns.
///
/// `on_mark`, if given, is invoked after every MARK with the wake cause and
/// dispatch outcome of that iteration — the hook `nsched-daemon` uses to
/// keep its `StatusSnapshot` current without the HTTP handlers ever
/// touching the database.
#[instrument(skip(pool, publisher, listener, cfg, clock, shutdown, on_mark))]
pub async fn run(
    pool: PgPool,
    publisher: Arc<dyn EventPublisher>,
    listener: Arc<ScheduleChangeListener>,
    cfg: SchedulerConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    on_mark: Option<Arc<dyn Fn(&WakeCause, &DispatchOutcome) + Send + Sync>>,
) -> Result<(), SchedulerError> {
    // INIT: subscribe before the first QUERY so a mutation committed between
    // INIT and the first WAIT is not missed.
    let mut notify_rx = listener.subscribe();
    let db_timeout = StdDuration::from_secs(cfg.db_call_timeout_secs);

    // In-memory retry counter: reset on successful dispatch, incremented on
    // publish failure. Lost on restart by design — a restarted scheduler
    // re-discovers the row via `peek_next_due` and starts its retry count
    // fresh.
    let mut retry_counts: HashMap<Uuid, u32> = HashMap::new();
    // Exponential backoff applied to the *next* iteration's wait after a
    // Saturated publish response; never blocks the current transaction.
    // Capped by `safety_timeout_secs`.
    let mut backoff_secs: u64 = 0;

    loop {
        if shutdown.is_cancelled() {
            info!("scheduler loop observed shutdown before QUERY, exiting");
            return Ok(());
        }

        // QUERY
        let next_due = match tokio::time::timeout(db_timeout, nsched_db::peek_next_due(&pool, clock.now())).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(error = %e, "peek_next_due failed, treating as transient");
                tokio::time::sleep(StdDuration::from_secs(1)).await;
                continue;
            }
            Err(_) => {
                warn!("peek_next_due timed out, treating as transient");
                tokio::time::sleep(StdDuration::from_secs(1)).await;
                continue;
            }
        };

        let now = clock.now();
        let mut wait = compute_wait(next_due.map(|(due, _)| due), now, &cfg);
        if backoff_secs > 0 {
            wait += StdDuration::from_secs(backoff_secs);
        }
        let safety_timeout = StdDuration::from_secs(cfg.safety_timeout_secs.max(0) as u64);

        // WAIT: earliest of (wait elapsing, a notification, safety_timeout
        // regardless, shutdown).
        let wake_cause = tokio::select! {
            _ = tokio::time::sleep(wait) => WakeCause::TimerElapsed,
            _ = tokio::time::sleep(safety_timeout) => WakeCause::SafetyTimeout,
            res = notify_rx.recv() => match res {
                Ok(payload) => WakeCause::Notified(payload),
                Err(_lagged_or_closed) => WakeCause::TimerElapsed,
            },
            _ = shutdown.cancelled() => WakeCause::Shutdown,
        };

        if matches!(wake_cause, WakeCause::Shutdown) {
            info!("scheduler loop cancelled during WAIT, exiting");
            return Ok(());
        }

        // DISPATCH + MARK
        let dispatch_now = clock.now();
        match dispatch_once(&pool, &publisher, &cfg, dispatch_now, &mut retry_counts).await {
            Ok(outcome) => {
                backoff_secs = if outcome.saturated {
                    (backoff_secs.max(1) * 2).min(cfg.safety_timeout_secs.max(1) as u64)
                } else {
                    0
                };
                if let Some(hook) = &on_mark {
                    hook(&wake_cause, &outcome);
                }
            }
            Err(SchedulerError::Fatal(msg)) => return Err(SchedulerError::Fatal(msg)),
            Err(e) => {
                warn!(error = %e, "dispatch pass failed, retrying next iteration");
                tokio::time::sleep(StdDuration::from_secs(1)).await;
            }
        }

        if shutdown.is_cancelled() {
            info!("scheduler loop finished in-flight dispatch after shutdown, exiting");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    #[test]
    fn compute_wait_uses_safety_timeout_when_queue_empty() {
        let now = Utc::now();
        let wait = compute_wait(None, now, &cfg());
        assert_eq!(wait, StdDuration::from_secs(cfg().safety_timeout_secs as u64));
    }

    #[test]
    fn compute_wait_subtracts_small_lead_from_due_time() {
        let now = Utc::now();
        let due = now + ChronoDuration::seconds(70);
        let wait = compute_wait(Some(due), now, &cfg());
        assert_eq!(wait, StdDuration::from_secs(60));
    }

    #[test]
    fn compute_wait_never_goes_negative_for_overdue_rows() {
        let now = Utc::now();
        let due = now - ChronoDuration::seconds(5);
        let wait = compute_wait(Some(due), now, &cfg());
        assert_eq!(wait, StdDuration::from_millis(0));
    }

    #[test]
    fn dead_letter_envelope_carries_fixed_event_name() {
        let env = dead_letter_envelope("x:reminder", Uuid::new_v4(), "reminder");
        assert_eq!(env.event, "game.schedule_dead_letter");
        assert_eq!(env.dedup_key, "x:reminder");
    }
}
