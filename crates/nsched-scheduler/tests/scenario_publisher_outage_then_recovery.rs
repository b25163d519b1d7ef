//! A publisher outage leaves rows `sent = false` across every failed
//! attempt; once the broker recovers, the next `advance` dispatches the
//! overdue row without it having been lost or duplicated. Driven through
//! `nsched-testkit::SchedulerHarness` rather than hand-rolled transaction
//! plumbing.
#![cfg(test)]

use chrono::{Duration, Utc};
use nsched_schemas::NotificationKind;
use nsched_testkit::{testkit_db_pool, SchedulerHarness};
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires NSCHED_DATABASE_URL"]
async fn publisher_outage_then_recovery_dispatches_exactly_once() {
    let pool = testkit_db_pool().await.expect("db pool");
    let now = Utc::now();
    let game_id = Uuid::new_v4();

    let mut seed_tx = pool.begin().await.unwrap();
    nsched_db::upsert(
        &mut *seed_tx,
        game_id,
        NotificationKind::Reminder,
        Some(15),
        now - Duration::seconds(1),
    )
    .await
    .unwrap();
    seed_tx.commit().await.unwrap();

    let mut harness = SchedulerHarness::new(pool.clone(), now);

    // Broker down for three consecutive attempts: the row must stay
    // unmarked and get reclaimed every time, never lost.
    harness.fail_next_publish(3);
    for _ in 0..3 {
        let outcome = harness.advance(Duration::seconds(0)).await;
        assert!(outcome.dispatched.is_empty(), "row must not dispatch while the broker is down");
        assert!(outcome.dead_lettered.is_empty(), "row must not be dead-lettered mid-outage");
    }

    // Broker recovers: the next pass dispatches the row exactly once.
    let outcome = harness.advance(Duration::seconds(0)).await;
    assert_eq!(outcome.dispatched.len(), 1, "row must dispatch once the broker recovers");
    assert_eq!(harness.dispatched().len(), 1, "exactly one envelope recorded, no duplicate delivery");

    let mut tx = pool.begin().await.unwrap();
    nsched_db::delete_by_game(&mut *tx, game_id).await.unwrap();
    tx.commit().await.unwrap();
}
