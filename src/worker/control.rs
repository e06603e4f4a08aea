//! Operator control signals
//!
//! A signal is a small JSON document at `worker:control`, for example
//! `{"action":"pause","issued_at":"2024-03-09T10:00:00Z"}`. The worker
//! reads and deletes it in one step, so each signal is applied once. A bare
//! action string is accepted too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{WorkerContext, WorkerError};
use crate::store::{KeySpace, ResilientStore, StoreError, StoreResult};

const DEFAULT_SIGNAL_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Restart,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Restart => "restart",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(ControlAction::Pause),
            "resume" => Ok(ControlAction::Resume),
            "restart" => Ok(ControlAction::Restart),
            other => Err(WorkerError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSignal {
    pub action: ControlAction,
    pub issued_at: DateTime<Utc>,
}

impl ControlSignal {
    pub fn new(action: ControlAction) -> Self {
        Self {
            action,
            issued_at: Utc::now(),
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw)
            .ok()
            .or_else(|| raw.parse().ok().map(Self::new))
    }
}

/// Read/write side of the control key
#[derive(Clone)]
pub struct ControlChannel {
    store: ResilientStore,
    keys: KeySpace,
    ttl: Duration,
}

impl ControlChannel {
    pub fn new(store: ResilientStore, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            ttl: DEFAULT_SIGNAL_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Write a signal; a newer signal replaces one not yet applied
    pub async fn send(&self, action: ControlAction) -> StoreResult<ControlSignal> {
        let signal = ControlSignal::new(action);
        let raw = serde_json::to_string(&signal).map_err(|e| StoreError::Command(e.to_string()))?;
        self.store
            .set(&self.keys.control(), &raw, Some(self.ttl))
            .await?;
        Ok(signal)
    }

    /// Read and clear the pending signal
    pub async fn take(&self) -> StoreResult<Option<ControlSignal>> {
        let Some(raw) = self.store.take(&self.keys.control()).await? else {
            return Ok(None);
        };
        let signal = ControlSignal::parse(&raw);
        if signal.is_none() {
            warn!(raw = %raw, "Ignoring unreadable control signal");
        }
        Ok(signal)
    }
}

/// Apply a signal to this worker
///
/// Restart is forwarded to the worker, which stops and restarts every unit.
pub fn apply(ctx: &WorkerContext, signal: &ControlSignal, restart: &mpsc::Sender<()>) {
    info!(action = %signal.action, issued_at = %signal.issued_at, "Control signal received");
    match signal.action {
        ControlAction::Pause => ctx.pause(),
        ControlAction::Resume => ctx.resume(),
        ControlAction::Restart => {
            if restart.try_send(()).is_err() {
                warn!("Restart already pending");
            }
        }
    }
}

pub async fn run(
    ctx: WorkerContext,
    channel: ControlChannel,
    restart: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WorkerError> {
    let mut ticker = tokio::time::interval(ctx.timings.control_poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match channel.take().await {
                    Ok(Some(signal)) => apply(&ctx, &signal, &restart),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Control poll failed"),
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
