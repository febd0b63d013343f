//! Idle sandbox reaper.
//!
//! Periodically sweeps the record store for running sandboxes past their
//! auto-stop deadline, releases the remote sandbox, and marks the record
//! stopped. The remote release is best-effort; the record is marked stopped
//! even when the close fails, so a sandbox is never reaped twice.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::sandbox::SandboxProvider;
use crate::store::{RecordStore, SandboxStatus};

/// One sweep over the store at `now`. Returns how many records were stopped.
pub async fn reap_once(
    store: &dyn RecordStore,
    provider: &dyn SandboxProvider,
    now: DateTime<Utc>,
) -> usize {
    let expired = match store.list_expired(now).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "Reaper sweep could not list expired sandboxes");
            return 0;
        }
    };

    let mut reaped = 0;
    for record in expired {
        let idle_minutes = (now - record.last_active_at).num_minutes();
        info!(
            sandbox_id = %record.sandbox_id,
            idle_minutes,
            "Reaping idle sandbox"
        );

        match provider.connect(&record.sandbox_id).await {
            Ok(handle) => {
                if let Err(e) = handle.close().await {
                    warn!(sandbox_id = %record.sandbox_id, error = %e, "Failed to close idle sandbox");
                }
            }
            Err(e) => {
                // Already gone remotely; the record still needs updating.
                debug!(sandbox_id = %record.sandbox_id, error = %e, "Could not reattach to idle sandbox");
            }
        }

        match store
            .set_status(&record.sandbox_id, SandboxStatus::Stopped, None)
            .await
        {
            Ok(_) => reaped += 1,
            Err(e) => {
                warn!(sandbox_id = %record.sandbox_id, error = %e, "Failed to mark reaped sandbox stopped");
            }
        }
    }

    reaped
}

/// Runs sweeps forever at the given interval. Spawned as a background task
/// alongside the server.
pub async fn run_reaper(
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn SandboxProvider>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let reaped = reap_once(store.as_ref(), provider.as_ref(), Utc::now()).await;
        if reaped > 0 {
            info!(reaped, "Reaper sweep complete");
        }
    }
}
