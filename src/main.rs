use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use fleetbook::auth::SessionKeys;
use fleetbook::config::Config;
use fleetbook::engine::Engine;
use fleetbook::http::{AppState, build_router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    fleetbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path())?);

    if let Some(admin) = &config.admin {
        fleetbook::seed::ensure_admin(&engine, admin).await?;
    }
    if config.seed_demo {
        fleetbook::seed::seed_demo(&engine).await?;
    }

    let compactor_engine = engine.clone();
    let (threshold, every) = (config.compact_threshold, config.compact_interval);
    tokio::spawn(async move {
        fleetbook::compactor::run_compactor(compactor_engine, threshold, every).await;
    });

    let sessions = match &config.session_secret {
        Some(secret) => SessionKeys::new(secret.as_bytes(), config.session_ttl),
        None => {
            warn!("FLEETBOOK_SESSION_SECRET not set, sessions will not survive a restart");
            SessionKeys::random(config.session_ttl)
        }
    };
    let state = AppState::new(
        engine.clone(),
        sessions,
        config.demo_user.clone(),
        config.max_in_flight,
    );
    let app = build_router(state);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("fleetbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_in_flight: {}", config.max_in_flight);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Leave a compact log behind when there is anything to fold.
    if engine.wal_appends_since_compact().await > 0
        && let Err(e) = engine.compact_wal().await
    {
        warn!("final compaction failed: {e}");
    }
    info!("fleetbook stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
