//! Axum router and HTTP handlers for nsched-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use nsched_scheduler::{DispatchOutcome, WakeCause};
use serde::Serialize;

use crate::state::{uptime_secs, AppState, StatusSnapshot};

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: &'static str,
}

pub(crate) async fn healthz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    (StatusCode::OK, Json(snap))
}

/// Build the `on_mark` hook `nsched_scheduler::run` invokes after every MARK.
/// Kept here, not in `state.rs`, because it is the one place that translates
/// scheduler-loop vocabulary (`WakeCause`, `DispatchOutcome`) into the HTTP
/// surface's `StatusSnapshot`.
pub fn status_hook(status: Arc<tokio::sync::RwLock<StatusSnapshot>>) -> Arc<dyn Fn(&WakeCause, &DispatchOutcome) + Send + Sync> {
    Arc::new(move |wake_cause, outcome| {
        let wake_label = match wake_cause {
            WakeCause::TimerElapsed => "timer_elapsed",
            WakeCause::Notified(_) => "notified",
            WakeCause::SafetyTimeout => "safety_timeout",
            WakeCause::Shutdown => "shutdown",
        };
        let status = Arc::clone(&status);
        let dispatched_count = outcome.dispatched.len();
        let dead_lettered_count = outcome.dead_lettered.len() as u64;
        tokio::spawn(async move {
            let mut snap = status.write().await;
            snap.last_wake_cause = wake_label.to_string();
            snap.last_dispatched_count = dispatched_count;
            snap.dead_letter_count_since_boot += dead_lettered_count;
            snap.last_mark_at = Some(chrono::Utc::now());
        });
    })
}
