use std::sync::Arc;

use anyhow::Context;
use tether_core::store::RemoteStore;
use tether_db::pg_store::PgRemoteStore;
use tether_engine::{tasks, ConnectivityState, EngineConfig, FileCache, StreakEngine};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_worker=debug,tether_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        grace_period_days = config.grace_period_days,
        sweep_interval_secs = config.sweep_interval.as_secs(),
        cache_dir = %config.cache_dir.display(),
        "Loaded engine configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = tether_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    tether_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    tether_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Engine ---
    let store: Arc<dyn RemoteStore> = Arc::new(PgRemoteStore::new(pool));
    let cache = Arc::new(FileCache::new(config.cache_dir.clone()));
    let connectivity = Arc::new(ConnectivityState::new(true));
    let sweep_interval = config.sweep_interval;
    let engine = Arc::new(
        StreakEngine::new(config, store, cache).with_connectivity(connectivity.clone()),
    );

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let sync_handle = tokio::spawn(tasks::run_sync_loop(
        engine.clone(),
        connectivity,
        cancel.clone(),
    ));
    let sweep_handle = tokio::spawn(tasks::run_sweep_loop(
        engine,
        sweep_interval,
        cancel.clone(),
    ));
    tracing::info!("Worker started");

    shutdown_signal().await;
    cancel.cancel();

    if let Err(e) = sweep_handle.await {
        tracing::error!(error = %e, "Sweep task panicked");
    }
    if let Err(e) = sync_handle.await {
        tracing::error!(error = %e, "Sync task panicked");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
