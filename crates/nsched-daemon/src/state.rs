//! Shared runtime state for nsched-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of the scheduler loop's state, returned by
/// GET /v1/status. Updated by [`crate::routes::status_hook`] after every
/// MARK so the HTTP surface reflects live state without querying the
/// database on every request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// "timer_elapsed" | "notified" | "safety_timeout" | "none" (no WAIT completed yet).
    pub last_wake_cause: String,
    /// Rows dispatched on the most recent MARK.
    pub last_dispatched_count: usize,
    /// Rows moved to dead-letter since boot.
    pub dead_letter_count_since_boot: u64,
    pub last_mark_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        StatusSnapshot {
            daemon_uptime_secs: 0,
            last_wake_cause: "none".to_string(),
            last_dispatched_count: 0,
            dead_letter_count_since_boot: 0,
            last_mark_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub build: BuildInfo,
    pub status: Arc<RwLock<StatusSnapshot>>,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            build: BuildInfo {
                service: "nsched-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: Arc::new(RwLock::new(StatusSnapshot::default())),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}
