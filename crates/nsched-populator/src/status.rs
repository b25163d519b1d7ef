//! Status Transition Scheduler — the pure half.
//!
//! There is no separate state machine: status rows are two more `upsert`
//! calls inside [`crate::populate`]'s transaction. This module holds only
//! the deterministic computation of their due times, kept side-effect-free
//! so it is exhaustively unit-testable without a database.

use chrono::{DateTime, Duration, Utc};
use nsched_config::SchedulerConfig;
use nsched_schemas::Game;

/// `(status_in_progress due_time, status_completed due_time)` for a game.
/// `duration` falls back to `cfg.default_game_duration_minutes` when
/// `game.duration_minutes` is unset. `status_completed`'s due_time is always
/// strictly after `status_in_progress`'s.
pub fn due_times(game: &Game, cfg: &SchedulerConfig) -> (DateTime<Utc>, DateTime<Utc>) {
    let duration_minutes = game
        .duration_minutes
        .unwrap_or(cfg.default_game_duration_minutes);
    let in_progress_at = game.scheduled_at;
    let completed_at = game.scheduled_at + Duration::minutes(duration_minutes);
    (in_progress_at, completed_at)
}
