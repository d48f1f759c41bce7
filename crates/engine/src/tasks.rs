//! Long-running engine tasks: replay on reconnect and the daily sweep.
//!
//! Both run until their [`CancellationToken`] is triggered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tether_core::collaborators::ConnectivitySignal;
use tokio_util::sync::CancellationToken;

use crate::engine::StreakEngine;

/// Replay the offline queue whenever connectivity comes back.
///
/// Drains once at start when already online, then on every offline → online
/// edge reported by the signal.
pub async fn run_sync_loop(
    engine: Arc<StreakEngine>,
    connectivity: Arc<dyn ConnectivitySignal>,
    cancel: CancellationToken,
) {
    let mut rx = connectivity.subscribe();
    let mut was_online = *rx.borrow_and_update();

    tracing::info!(online = was_online, "Offline queue sync task started");

    if was_online {
        sync(&engine).await;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Offline queue sync task stopping");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("Connectivity signal closed, stopping sync task");
                    break;
                }
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    tracing::info!("Connectivity restored");
                    sync(&engine).await;
                }
                was_online = online;
            }
        }
    }
}

async fn sync(engine: &StreakEngine) {
    match engine.sync_pending().await {
        Ok(report) => {
            if report.replayed > 0 || !report.failures.is_empty() {
                tracing::info!(
                    replayed = report.replayed,
                    failed = report.failures.len(),
                    remaining = report.remaining,
                    "Reconnect sync complete",
                );
            } else {
                tracing::debug!("Reconnect sync: nothing queued");
            }
        }
        Err(e) => tracing::error!(error = %e, "Reconnect sync failed"),
    }
}

/// Sweep every user with relationship streaks once per `interval`.
pub async fn run_sweep_loop(
    engine: Arc<StreakEngine>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Daily sweep task started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Daily sweep task stopping");
                break;
            }
            _ = ticker.tick() => {
                sweep_all(&engine, &cancel).await;
            }
        }
    }
}

async fn sweep_all(engine: &StreakEngine, cancel: &CancellationToken) {
    let users = match engine.sweep_targets().await {
        Ok(users) => users,
        Err(e) => {
            tracing::error!(error = %e, "Daily sweep: failed to list users");
            return;
        }
    };

    let now = Utc::now();
    let (mut changed, mut broken, mut failed) = (0, 0, 0);
    for user_id in &users {
        if cancel.is_cancelled() {
            break;
        }
        match engine.run_daily_sweep(*user_id, now).await {
            Ok(report) => {
                changed += report.value().changed;
                broken += report.value().broken;
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Daily sweep failed for user");
                failed += 1;
            }
        }
    }

    tracing::info!(users = users.len(), changed, broken, failed, "Daily sweep finished");
}
