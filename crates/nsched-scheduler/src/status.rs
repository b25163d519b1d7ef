//! Status Transition Scheduler, runtime half.
//!
//! Status rows flow through the same [`crate::run`] loop as reminders —
//! there is nothing to run independently here. This module holds only the
//! pure mapping from a status `NotificationKind` to the downstream
//! "intended target state", which a consumer of the published event uses
//! to flip the game's actual state (the scheduler itself never writes to
//! the game table).

use nsched_schemas::NotificationKind;

/// The game lifecycle state a dispatched status row asks a downstream
/// consumer to transition to. `None` for non-status kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetGameState {
    InProgress,
    Completed,
}

pub fn target_state(kind: NotificationKind) -> Option<TargetGameState> {
    match kind {
        NotificationKind::StatusInProgress => Some(TargetGameState::InProgress),
        NotificationKind::StatusCompleted => Some(TargetGameState::Completed),
        NotificationKind::Reminder | NotificationKind::JoinAnnouncement => None,
    }
}
