//! Integration-test harness for the notification scheduler core.
//!
//! Drives a scenario end-to-end against a real or simulated backend,
//! following the `#[ignore]` + `NSCHED_DATABASE_URL` scenario-test
//! convention used throughout this workspace's `tests/` directories.
//!
//! `nsched_db::testkit_db_pool` already provides the "connect + migrate"
//! half of that contract directly (it needs no other crate's types), so
//! scenario tests call it straight from `nsched-db`. What this crate adds is
//! the step-by-step driver: a real Postgres-backed store paired with an
//! in-memory publisher and a fixed clock, so a scenario test can advance
//! time and assert on exactly what got dispatched without reimplementing
//! the scheduler loop's DISPATCH+MARK half in every test file.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use nsched_config::SchedulerConfig;
use nsched_publisher::{EventPublisher, InMemoryPublisher};
use nsched_scheduler::{DispatchOutcome, FixedClock};
use nsched_schemas::EventEnvelope;
use sqlx::PgPool;
use uuid::Uuid;

pub use nsched_db::testkit_db_pool;

/// Drives the scheduler's DISPATCH+MARK half against a real Postgres pool,
/// one step at a time, without running the full `nsched_scheduler::run`
/// loop (no WAIT, no background tasks).
pub struct SchedulerHarness {
    pool: PgPool,
    publisher: Arc<InMemoryPublisher>,
    clock: Arc<FixedClock>,
    cfg: SchedulerConfig,
    retry_counts: HashMap<Uuid, u32>,
}

impl SchedulerHarness {
    pub fn new(pool: PgPool, start: DateTime<Utc>) -> Self {
        Self::with_config(pool, start, SchedulerConfig::default())
    }

    pub fn with_config(pool: PgPool, start: DateTime<Utc>, cfg: SchedulerConfig) -> Self {
        SchedulerHarness {
            pool,
            publisher: Arc::new(InMemoryPublisher::new()),
            clock: Arc::new(FixedClock::new(start)),
            cfg,
            retry_counts: HashMap::new(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Script the in-memory publisher to fail the next `n` calls.
    pub fn fail_next_publish(&self, n: u32) {
        self.publisher.fail_next(n);
    }

    /// Script the in-memory publisher to report saturation for the next `n`
    /// calls.
    pub fn saturate_next_publish(&self, n: u32) {
        self.publisher.saturate_next(n);
    }

    /// Move the fixed clock forward by `delta` and run exactly one
    /// DISPATCH+MARK pass against the current time — the step-by-step
    /// equivalent of one iteration of `nsched_scheduler::run`'s loop body,
    /// without its WAIT state.
    pub async fn advance(&mut self, delta: Duration) -> DispatchOutcome {
        self.clock.advance(delta);
        let now = self.clock.now();
        let publisher: Arc<dyn EventPublisher> = Arc::clone(&self.publisher) as Arc<dyn EventPublisher>;
        nsched_scheduler::dispatch_once(&self.pool, &publisher, &self.cfg, now, &mut self.retry_counts)
            .await
            .expect("dispatch_once failed in test harness")
    }

    /// All envelopes the in-memory publisher has recorded so far, in publish
    /// order (including any dead-letter envelopes).
    pub fn dispatched(&self) -> Vec<EventEnvelope> {
        self.publisher.dispatched()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_starts_with_no_dispatched_envelopes() {
        // Constructing the harness needs a live pool in the real scenario
        // tests (see crates/*/tests/); this unit test only pins down the
        // publisher-side invariant, which is pool-independent.
        let publisher = InMemoryPublisher::new();
        assert!(publisher.dispatched().is_empty());
    }
}
