//! In-process scenario tests for nsched-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket and
//! without a live database connection — `/healthz` and `/v1/status` never
//! touch the pool, so a lazily-connecting pool is enough.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use nsched_daemon::{routes, state};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt; // oneshot

fn make_router() -> axum::Router {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://ignored/ignored")
        .expect("lazy pool construction never touches the network");
    let st = Arc::new(state::AppState::new(pool));
    routes::build_router(st)
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

#[tokio::test]
async fn healthz_returns_200_ok_true() {
    let router = make_router();
    let req = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "nsched-daemon");
}

#[tokio::test]
async fn status_starts_with_no_wake_cause_recorded() {
    let router = make_router();
    let req = Request::builder()
        .method("GET")
        .uri("/v1/status")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["last_wake_cause"], "none");
    assert_eq!(json["last_dispatched_count"], 0);
    assert_eq!(json["dead_letter_count_since_boot"], 0);
    assert!(json["last_mark_at"].is_null());
}

#[tokio::test]
async fn status_hook_updates_snapshot_after_a_mark() {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://ignored/ignored")
        .expect("lazy pool construction never touches the network");
    let st = Arc::new(state::AppState::new(pool));
    let hook = routes::status_hook(Arc::clone(&st.status));

    let outcome = nsched_scheduler::DispatchOutcome {
        dispatched: vec![uuid::Uuid::new_v4()],
        dead_lettered: vec![uuid::Uuid::new_v4()],
        saturated: false,
    };
    hook(&nsched_scheduler::WakeCause::TimerElapsed, &outcome);

    // The hook spawns a task to update the snapshot; give it a tick to run.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let snap = st.status.read().await.clone();
    assert_eq!(snap.last_wake_cause, "timer_elapsed");
    assert_eq!(snap.last_dispatched_count, 1);
    assert_eq!(snap.dead_letter_count_since_boot, 1);
    assert!(snap.last_mark_at.is_some());
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let router = make_router();
    let req = Request::builder()
        .method("GET")
        .uri("/does_not_exist")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, _) = call(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
