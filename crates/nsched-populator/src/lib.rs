//! Schedule Populator: keeps `notification_schedule` consistent with the
//! current state of each game, including the status-transition row
//! insertion, which lives in the same `populate` transaction rather than a
//! separate state machine — reminders and status transitions both fire once
//! at a fixed instant, so one substrate covers both.
//!
//! [`resolve_reminder_offsets`] and [`status::due_times`] are pure functions,
//! unit-tested exhaustively; [`populate`] is the thin shell that sequences
//! their output into store writes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use nsched_config::SchedulerConfig;
use nsched_schemas::{Game, NotificationKind};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

pub mod status;

/// Four-tier reminder-offset inheritance ladder: the first `Some(_)` tier
/// wins, later tiers are never consulted once a tier answers. An explicit
/// lookup, not a merge.
pub fn resolve_reminder_offsets(game: &Game, defaults: &SchedulerConfig) -> Vec<i64> {
    game.reminder_offsets
        .clone()
        .or_else(|| game.template_reminder_offsets.clone())
        .or_else(|| game.channel_reminder_offsets.clone())
        .or_else(|| game.guild_reminder_offsets.clone())
        .unwrap_or_else(|| defaults.default_reminder_offsets.clone())
}

/// Recompute and upsert the full schedule for one game. Runs against an
/// already-open connection/transaction so the caller (the API service,
/// which owns the enclosing game-mutation transaction) can commit both
/// together. Errors surface synchronously — this function never retries;
/// retry policy belongs entirely to the caller.
#[instrument(skip(conn, cfg), fields(game_id = %game.id))]
pub async fn populate(
    conn: &mut PgConnection,
    game: &Game,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    // Step 1: resolve the final offset list.
    let offsets = resolve_reminder_offsets(game, cfg);

    // Step 3: delete existing rows so a game moved earlier never leaves
    // stale rows with larger offsets behind.
    nsched_db::delete_by_game(&mut *conn, game.id).await?;

    // Step 4: one reminder row per resolved offset whose computed due_time
    // is still in the future. Past offsets are simply not created.
    for offset_minutes in &offsets {
        let due_time = game.scheduled_at - chrono::Duration::minutes(*offset_minutes);
        if due_time > now {
            nsched_db::upsert(
                &mut *conn,
                game.id,
                NotificationKind::Reminder,
                Some(*offset_minutes),
                due_time,
            )
            .await?;
        }
    }

    // Step 5: one-shot immediate join announcement, only on game creation.
    if game.just_created {
        nsched_db::upsert(
            &mut *conn,
            game.id,
            NotificationKind::JoinAnnouncement,
            None,
            now,
        )
        .await?;
    }

    // Step 6: status-transition rows, inserted here rather than by a
    // separate state machine — they share the schedule substrate's
    // "fire once at T" semantics.
    let (in_progress_at, completed_at) = status::due_times(game, cfg);
    nsched_db::upsert(
        &mut *conn,
        game.id,
        NotificationKind::StatusInProgress,
        None,
        in_progress_at,
    )
    .await?;
    nsched_db::upsert(
        &mut *conn,
        game.id,
        NotificationKind::StatusCompleted,
        None,
        completed_at,
    )
    .await?;

    Ok(())
}

/// Remove all schedule rows for a game. Thin wrapper over
/// `nsched_db::delete_by_game`, kept as a distinct name so call sites read
/// as intent ("the game was cancelled") rather than a raw store op.
pub async fn clear(conn: &mut PgConnection, game_id: Uuid) -> Result<()> {
    nsched_db::delete_by_game(&mut *conn, game_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_with(
        reminder: Option<Vec<i64>>,
        template: Option<Vec<i64>>,
        channel: Option<Vec<i64>>,
        guild: Option<Vec<i64>>,
    ) -> Game {
        Game {
            id: Uuid::new_v4(),
            scheduled_at: Utc::now(),
            duration_minutes: None,
            just_created: false,
            reminder_offsets: reminder,
            template_reminder_offsets: template,
            channel_reminder_offsets: channel,
            guild_reminder_offsets: guild,
        }
    }

    #[test]
    fn game_tier_wins_when_present() {
        let g = game_with(Some(vec![5]), Some(vec![10]), Some(vec![20]), Some(vec![30]));
        let cfg = SchedulerConfig::default();
        assert_eq!(resolve_reminder_offsets(&g, &cfg), vec![5]);
    }

    #[test]
    fn template_tier_wins_when_game_absent() {
        let g = game_with(None, Some(vec![10]), Some(vec![20]), Some(vec![30]));
        let cfg = SchedulerConfig::default();
        assert_eq!(resolve_reminder_offsets(&g, &cfg), vec![10]);
    }

    #[test]
    fn channel_tier_wins_when_game_and_template_absent() {
        let g = game_with(None, None, Some(vec![20]), Some(vec![30]));
        let cfg = SchedulerConfig::default();
        assert_eq!(resolve_reminder_offsets(&g, &cfg), vec![20]);
    }

    #[test]
    fn guild_tier_wins_when_only_guild_present() {
        let g = game_with(None, None, None, Some(vec![30]));
        let cfg = SchedulerConfig::default();
        assert_eq!(resolve_reminder_offsets(&g, &cfg), vec![30]);
    }

    #[test]
    fn hardcoded_fallback_when_all_tiers_absent() {
        let g = game_with(None, None, None, None);
        let cfg = SchedulerConfig::default();
        assert_eq!(resolve_reminder_offsets(&g, &cfg), vec![60, 15]);
    }

    #[test]
    fn empty_vec_at_a_tier_still_wins_over_lower_tiers() {
        // An empty list is `Some(vec![])`, not `None` — the ladder is a
        // presence check, not a truthiness check. A game that explicitly
        // disables all reminders must not fall through to the guild default.
        let g = game_with(Some(vec![]), None, None, Some(vec![30]));
        let cfg = SchedulerConfig::default();
        assert_eq!(resolve_reminder_offsets(&g, &cfg), Vec::<i64>::new());
    }
}
