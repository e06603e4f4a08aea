//! Liveness beacon
//!
//! Writes the current time to `worker:heartbeat` with an expiry, and the
//! counter snapshot to the `worker:stats` hash. A missing heartbeat means
//! no live worker.

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{WorkerContext, WorkerError};
use crate::store::StoreResult;

/// Write one heartbeat and stats snapshot
pub async fn beat(ctx: &WorkerContext) -> StoreResult<()> {
    let now = Utc::now().to_rfc3339();
    ctx.store
        .set(&ctx.keys.heartbeat(), &now, Some(ctx.timings.heartbeat_ttl))
        .await?;

    let mut fields = ctx.pipeline.stats.snapshot().to_fields();
    fields.push(("started_at".into(), ctx.started_at.to_rfc3339()));
    fields.push(("last_heartbeat".into(), now));
    fields.push(("paused".into(), ctx.is_paused().to_string()));
    ctx.store.hash_set(&ctx.keys.stats(), &fields).await
}

pub async fn run(ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
    let mut ticker = tokio::time::interval(ctx.timings.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match beat(&ctx).await {
                    Ok(()) => debug!("Heartbeat written"),
                    Err(e) => warn!(error = %e, "Heartbeat failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}
