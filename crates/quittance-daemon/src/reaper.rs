//! The expiry reaper.
//!
//! A background loop that sweeps expired leases at a bounded cadence and
//! applies the retry policy, emitting `escalate(policy, "lease_expired")`
//! receipts as it goes (the sweep itself lives in
//! [`TaskStore::sweep_expired`]). Store failures pause the loop with
//! exponential backoff; the sweep is idempotent, so nothing is lost while
//! the store is away.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use quittance_core::config::EngineConfig;

use crate::store::TaskStore;

/// First backoff step after a store failure.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Spawns the reaper loop. Flip the watch channel to stop it.
#[must_use]
pub fn spawn(
    tasks: TaskStore,
    engine: EngineConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(tasks, engine, shutdown))
}

async fn run(tasks: TaskStore, engine: EngineConfig, mut shutdown: watch::Receiver<bool>) {
    let cadence = Duration::from_secs(engine.reaper_interval_seconds.max(1));
    let mut delay = cadence;
    let mut backoff = BACKOFF_BASE;
    tracing::info!(interval_seconds = engine.reaper_interval_seconds, "reaper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("reaper stopping");
                break;
            }
            () = tokio::time::sleep(delay) => {
                match tasks.sweep_expired(&engine, Utc::now()) {
                    Ok(_) => {
                        delay = cadence;
                        backoff = BACKOFF_BASE;
                    }
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            retry_in_seconds = backoff.as_secs(),
                            "reaper sweep failed; backing off"
                        );
                        delay = backoff;
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                }
            }
        }
    }
}
