//! nsched-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! connects the database, spawns the scheduler loop, and starts the HTTP
//! server. All route handlers live in `routes.rs`; all shared state types
//! live in `state.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use nsched_config::SchedulerConfig;
use nsched_daemon::{routes, state};
use nsched_publisher::EventPublisher;
use nsched_scheduler::SystemClock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_paths: Vec<String> = std::env::var("NSCHED_CONFIG_PATHS")
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let (cfg, config_json) = if config_paths.is_empty() {
        (SchedulerConfig::default(), serde_json::json!({}))
    } else {
        let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
        let loaded = nsched_config::load_layered_yaml(&path_refs)?;
        let cfg: SchedulerConfig = loaded.deserialize()?;
        (cfg, loaded.config_json)
    };

    let secrets = nsched_config::secrets::resolve_secrets(&config_json)
        .context("SECRETS_MISSING: cannot boot without required configuration")?;

    let pool = nsched_db::connect(&secrets.database_url).await?;
    nsched_db::migrate(&pool).await.context("db migrate failed")?;

    let publisher: Arc<dyn EventPublisher> = match &secrets.bus_url {
        Some(bus_url) => Arc::new(
            nsched_publisher::KafkaPublisher::connect(bus_url)
                .context("failed to connect to message bus")?,
        ),
        None => {
            info!("no bus url configured, dispatching through the in-memory publisher");
            Arc::new(nsched_publisher::InMemoryPublisher::new())
        }
    };

    let listener = Arc::new(nsched_db::ScheduleChangeListener::new(pool.clone()));
    let listener_handle = Arc::clone(&listener).start();

    let shared = Arc::new(state::AppState::new(pool.clone()));
    let shutdown = CancellationToken::new();
    let on_mark = routes::status_hook(Arc::clone(&shared.status));

    let scheduler_handle = tokio::spawn(nsched_scheduler::run(
        pool,
        publisher,
        listener,
        cfg,
        Arc::new(SystemClock),
        shutdown.clone(),
        Some(on_mark),
    ));

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("nsched-daemon listening on http://{}", addr);

    let listener_socket = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener_socket, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server crashed")?;

    shutdown.cancel();
    listener_handle.abort();
    match scheduler_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "scheduler loop exited with an error"),
        Err(e) => tracing::error!(error = %e, "scheduler task panicked"),
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("NSCHED_DAEMON_ADDR").ok()?.parse().ok()
}
