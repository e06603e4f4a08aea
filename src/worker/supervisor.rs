//! Loop supervision
//!
//! A failed loop is restarted after a cooldown. After `max_restarts`
//! restarts the failure is returned and the worker stops.

use std::future::Future;
use tokio::sync::watch;
use tracing::{error, warn};

use super::{WorkerContext, WorkerError};
use crate::metrics;
use crate::models::ActivityKind;

pub async fn supervise<F, Fut>(
    unit: &'static str,
    ctx: WorkerContext,
    shutdown: watch::Receiver<bool>,
    run: F,
) -> Result<(), WorkerError>
where
    F: Fn(WorkerContext, watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<(), WorkerError>>,
{
    let mut restarts = 0u32;
    loop {
        let err = match run(ctx.clone(), shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if *shutdown.borrow() {
            return Ok(());
        }

        if restarts >= ctx.timings.max_restarts {
            error!(unit, restarts, error = %err, "Loop keeps failing, giving up");
            ctx.pipeline
                .activity
                .note(
                    ActivityKind::WorkerError,
                    None,
                    format!("{unit} loop stopped after {restarts} restarts: {err}"),
                )
                .await;
            return Err(WorkerError::RestartsExhausted {
                unit,
                restarts,
                reason: err.to_string(),
            });
        }

        restarts += 1;
        metrics::record_loop_restart(unit);
        let cooldown = ctx.timings.restart_cooldown;
        warn!(
            unit,
            restarts,
            cooldown_secs = cooldown.as_secs(),
            error = %err,
            "Loop failed, restarting after cooldown"
        );
        ctx.pipeline
            .activity
            .note(ActivityKind::WorkerError, None, format!("{unit} loop failed: {err}"))
            .await;

        let mut rx = shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(cooldown) => {}
            _ = rx.changed() => return Ok(()),
        }
    }
}
