//! `populate(G, offsets); clear(G)` leaves the store with zero rows for G.
#![cfg(test)]

use chrono::{Duration, Utc};
use nsched_config::SchedulerConfig;
use nsched_schemas::Game;
use uuid::Uuid;

fn sample_game(scheduled_at: chrono::DateTime<Utc>) -> Game {
    Game {
        id: Uuid::new_v4(),
        scheduled_at,
        duration_minutes: Some(120),
        just_created: true,
        reminder_offsets: Some(vec![60, 15]),
        template_reminder_offsets: None,
        channel_reminder_offsets: None,
        guild_reminder_offsets: None,
    }
}

#[tokio::test]
#[ignore = "requires NSCHED_DATABASE_URL"]
async fn populate_then_clear_is_empty() {
    let pool = nsched_db::testkit_db_pool().await.expect("db pool");
    let cfg = SchedulerConfig::default();
    let now = Utc::now();
    let game = sample_game(now + Duration::hours(2));

    let mut tx = pool.begin().await.unwrap();
    nsched_populator::populate(&mut tx, &game, &cfg, now)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let (due, _) = nsched_db::peek_next_due(&pool, now).await.unwrap().unwrap();
    assert!(due > now);

    let mut tx = pool.begin().await.unwrap();
    nsched_populator::clear(&mut tx, game.id).await.unwrap();
    tx.commit().await.unwrap();

    let deleted_count = sqlx::query_scalar::<_, i64>(
        "select count(*) from notification_schedule where game_id = $1",
    )
    .bind(game.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(deleted_count, 0);
}
