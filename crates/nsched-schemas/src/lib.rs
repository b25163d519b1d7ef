//! Shared wire and row types for the notification scheduler core.
//!
//! This crate has no I/O of its own: every other crate in the workspace
//! depends on it for the vocabulary they pass across their own boundaries
//! (Postgres rows, change-notification payloads, published event envelopes).

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NotificationKind
// ---------------------------------------------------------------------------

/// The four kinds of schedule row. Reminder and status-transition rows share
/// one table (and one `kind` column) rather than living in separate tables —
/// they have identical "fire once at T" semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    Reminder,
    JoinAnnouncement,
    StatusInProgress,
    StatusCompleted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder",
            NotificationKind::JoinAnnouncement => "join_announcement",
            NotificationKind::StatusInProgress => "status_in_progress",
            NotificationKind::StatusCompleted => "status_completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "reminder" => Ok(NotificationKind::Reminder),
            "join_announcement" => Ok(NotificationKind::JoinAnnouncement),
            "status_in_progress" => Ok(NotificationKind::StatusInProgress),
            "status_completed" => Ok(NotificationKind::StatusCompleted),
            other => Err(anyhow!("invalid notification kind: {}", other)),
        }
    }

    /// Stable small-integer encoding for the `kind` column (avoids relying on
    /// a Postgres native enum type for a set that may grow).
    pub fn as_i16(&self) -> i16 {
        match self {
            NotificationKind::Reminder => 0,
            NotificationKind::JoinAnnouncement => 1,
            NotificationKind::StatusInProgress => 2,
            NotificationKind::StatusCompleted => 3,
        }
    }

    pub fn from_i16(v: i16) -> Result<Self> {
        match v {
            0 => Ok(NotificationKind::Reminder),
            1 => Ok(NotificationKind::JoinAnnouncement),
            2 => Ok(NotificationKind::StatusInProgress),
            3 => Ok(NotificationKind::StatusCompleted),
            other => Err(anyhow!("invalid notification kind code: {}", other)),
        }
    }

    /// The bus event name this kind publishes under.
    pub fn event_name(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "game.reminder_due",
            NotificationKind::JoinAnnouncement => "game.join_announcement_due",
            NotificationKind::StatusInProgress | NotificationKind::StatusCompleted => {
                "game.status_transition_due"
            }
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationRow
// ---------------------------------------------------------------------------

/// One row of `notification_schedule`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRow {
    pub id: Uuid,
    pub game_id: Uuid,
    pub kind: NotificationKind,
    /// Non-null only for `Reminder` rows.
    pub offset_minutes: Option<i64>,
    pub due_time: DateTime<Utc>,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// NotifyPayload — change-notification channel body
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Payload carried on the `notification_schedule_changes` Postgres channel.
/// Bounded to 8 KB by construction: three scalar fields, no nested structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub op: ChangeOp,
    pub game_id: Uuid,
    pub due_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// EventEnvelope — published event body
// ---------------------------------------------------------------------------

/// The bus message body handed to the Event Publisher Adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub dedup_key: String,
    pub game_id: Uuid,
    pub kind: String,
    pub offset_minutes: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
}

impl EventEnvelope {
    /// Build the envelope for a claimed row. `scheduled_for` is fixed to the
    /// row's stored `due_time` (nominal), never the actual dispatch instant,
    /// so a redelivery after a crash produces the same dedup key.
    pub fn for_row(row: &NotificationRow) -> Self {
        EventEnvelope {
            event: row.kind.event_name().to_string(),
            dedup_key: format!("{}:{}", row.id, row.kind.as_str()),
            game_id: row.game_id,
            kind: row.kind.as_str().to_string(),
            offset_minutes: row.offset_minutes,
            scheduled_for: row.due_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Game — the subset of the external game entity the core reads
// ---------------------------------------------------------------------------

/// Read-only projection of the external game entity, as returned by
/// `GameRepository::get_game`. Owned entirely by the API service; this
/// struct is the contract boundary the populator reads through.
#[derive(Debug, Clone)]
pub struct Game {
    pub id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub just_created: bool,

    /// Four-tier reminder-offset inheritance chain, most specific
    /// first. Each tier is `None` if unset at that level.
    pub reminder_offsets: Option<Vec<i64>>,
    pub template_reminder_offsets: Option<Vec<i64>>,
    pub channel_reminder_offsets: Option<Vec<i64>>,
    pub guild_reminder_offsets: Option<Vec<i64>>,
}
