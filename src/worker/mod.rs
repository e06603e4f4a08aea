//! Multi-queue worker
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────── MultiQueueWorker ────────────────┐
//!                 │                                                  │
//!  [discovery] ──▶│ consumer ─┐                                      │
//! [generation] ──▶│ consumer ─┼─ supervisor (restart after cooldown) │
//!    [publish] ──▶│ consumer ─┘   + promote_due each iteration       │
//!                 │                                                  │
//!                 │ heartbeat  control  periodic jobs                │
//!                 └──────────────────────────────────────────────────┘
//!                        │         ▲
//!                        ▼         │
//!               worker:heartbeat  worker:control
//! ```
//!
//! Every unit observes the same shutdown signal. Pause stops the consumers
//! and the periodic jobs; heartbeat and control keep running so the worker
//! stays observable and can be resumed. A restart signal stops every unit
//! and starts them again.

pub mod consumer;
pub mod control;
pub mod heartbeat;
pub mod supervisor;

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::collaborators::Collaborators;
use crate::config::{Config, WorkerConfig};
use crate::metrics;
use crate::pipeline::{PipelineContext, PipelineOptions};
use crate::queue::QueueName;
use crate::scheduler::{JobSchedule, PeriodicJobs};
use crate::store::{CoordinationStore, KeySpace, ResilientStore, StoreError, StoreRetryPolicy};

pub use control::{ControlAction, ControlChannel, ControlSignal};

/// Worker-level failures
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{unit} loop gave up after {restarts} restarts: {reason}")]
    RestartsExhausted {
        unit: &'static str,
        restarts: u32,
        reason: String,
    },

    #[error("Worker task panicked: {0}")]
    Panicked(String),

    #[error("Unknown control action: {0}")]
    UnknownAction(String),
}

/// Loop timing, from [`WorkerConfig`]
#[derive(Debug, Clone)]
pub struct WorkerTimings {
    pub poll_timeout: Duration,
    pub publish_poll_timeout: Duration,
    pub pause_poll: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_ttl: Duration,
    pub control_poll: Duration,
    pub control_ttl: Duration,
    pub restart_cooldown: Duration,
    pub max_restarts: u32,
    pub shutdown_grace: Duration,
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl WorkerTimings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            publish_poll_timeout: Duration::from_secs(config.publish_poll_timeout_secs),
            pause_poll: Duration::from_secs(config.pause_poll_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            heartbeat_ttl: Duration::from_secs(config.heartbeat_ttl_secs),
            control_poll: Duration::from_secs(config.control_poll_secs),
            control_ttl: Duration::from_secs(config.control_ttl_secs),
            restart_cooldown: Duration::from_secs(config.restart_cooldown_secs),
            max_restarts: config.max_restarts,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }

    /// Blocking pop timeout; the publish queue polls faster so promotion
    /// latency stays bounded
    pub fn poll_timeout_for(&self, queue: QueueName) -> Duration {
        match queue {
            QueueName::Publish => self.publish_poll_timeout,
            _ => self.poll_timeout,
        }
    }
}

/// State owned by one worker and shared with all of its units
#[derive(Clone)]
pub struct WorkerContext {
    pub store: ResilientStore,
    pub keys: KeySpace,
    pub pipeline: PipelineContext,
    /// Retry policy for the blocking pop
    pub pop_policy: StoreRetryPolicy,
    pub timings: WorkerTimings,
    pub started_at: DateTime<Utc>,
    paused: Arc<AtomicBool>,
}

impl WorkerContext {
    pub fn new(
        store: ResilientStore,
        keys: KeySpace,
        pipeline: PipelineContext,
        pop_policy: StoreRetryPolicy,
        timings: WorkerTimings,
    ) -> Self {
        Self {
            store,
            keys,
            pipeline,
            pop_policy,
            timings,
            started_at: Utc::now(),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build the whole context from configuration
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn CoordinationStore>,
        collaborators: Collaborators,
    ) -> Self {
        let (ordinary, pop) = StoreRetryPolicy::from_config(&config.retry);
        let store = ResilientStore::new(backend, ordinary);
        let keys = KeySpace::new(config.store.key_prefix.clone());
        let pipeline = PipelineContext::new(
            store.clone(),
            keys.clone(),
            collaborators,
            PipelineOptions::from_config(config),
        )
        .with_config(config);

        Self::new(store, keys, pipeline, pop, WorkerTimings::from_config(&config.worker))
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        metrics::set_paused(true);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        metrics::set_paused(false);
    }

    /// Shared pause flag, for units outside this module
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }
}

enum RunEnd {
    Shutdown,
    Restart,
}

/// Top-level worker: three consumers plus heartbeat, control and periodic jobs
pub struct MultiQueueWorker {
    ctx: WorkerContext,
    jobs: JobSchedule,
}

impl MultiQueueWorker {
    pub fn new(ctx: WorkerContext, jobs: JobSchedule) -> Self {
        Self { ctx, jobs }
    }

    pub fn from_config(
        config: &Config,
        backend: Arc<dyn CoordinationStore>,
        collaborators: Collaborators,
    ) -> Self {
        Self::new(
            WorkerContext::from_config(config, backend, collaborators),
            JobSchedule::from_config(&config.schedule),
        )
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Run until Ctrl-C
    pub async fn run(&self) -> Result<(), WorkerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Run until `stop` completes, restarting on a restart signal
    ///
    /// Returns an error only when a consumer exhausted its restarts.
    pub async fn run_until<F>(&self, stop: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let result = loop {
            match self.run_once(stop.as_mut()).await {
                Ok(RunEnd::Shutdown) => break Ok(()),
                Ok(RunEnd::Restart) => {
                    info!("Restarting worker");
                    self.ctx.resume();
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.ctx.store.delete(&self.ctx.keys.heartbeat()).await {
            warn!(error = %e, "Failed to clear heartbeat");
        }
        info!("Worker stopped");
        result
    }

    async fn run_once<F>(&self, stop: Pin<&mut F>) -> Result<RunEnd, WorkerError>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (restart_tx, mut restart_rx) = mpsc::channel::<()>(1);
        let mut units: JoinSet<Result<(), WorkerError>> = JoinSet::new();

        for handler in self.ctx.pipeline.handlers() {
            let ctx = self.ctx.clone();
            let rx = shutdown_rx.clone();
            let unit = handler.queue().as_str();
            units.spawn(supervisor::supervise(unit, ctx, rx, move |ctx, rx| {
                consumer::consume(ctx, Arc::clone(&handler), rx)
            }));
        }

        units.spawn(heartbeat::run(self.ctx.clone(), shutdown_rx.clone()));
        units.spawn(control::run(
            self.ctx.clone(),
            ControlChannel::new(self.ctx.store.clone(), self.ctx.keys.clone())
                .with_ttl(self.ctx.timings.control_ttl),
            restart_tx,
            shutdown_rx.clone(),
        ));

        let jobs = PeriodicJobs::new(
            self.ctx.pipeline.clone(),
            self.ctx.store.clone(),
            self.ctx.keys.clone(),
            self.jobs.clone(),
            self.ctx.pause_flag(),
        );
        let jobs_rx = shutdown_rx.clone();
        units.spawn(async move {
            jobs.run(jobs_rx).await;
            Ok(())
        });

        info!(units = units.len(), "Worker started");

        let end = tokio::select! {
            _ = stop => Ok(RunEnd::Shutdown),
            Some(()) = restart_rx.recv() => Ok(RunEnd::Restart),
            failure = first_failure(&mut units) => Err(failure),
        };

        let _ = shutdown_tx.send(true);
        self.drain(&mut units).await;

        if let Err(e) = &end {
            error!(error = %e, "Worker stopping after fatal error");
        }
        end
    }

    /// Wait for every unit to stop, aborting stragglers after the grace period
    async fn drain(&self, units: &mut JoinSet<Result<(), WorkerError>>) {
        let grace = self.ctx.timings.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while units.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(grace_secs = grace.as_secs(), "Units still running after grace period, aborting");
            units.abort_all();
            while units.join_next().await.is_some() {}
        }
    }
}

/// Resolves with the first unit that failed; pending while all are healthy
async fn first_failure(units: &mut JoinSet<Result<(), WorkerError>>) -> WorkerError {
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return e,
            Err(e) => return WorkerError::Panicked(e.to_string()),
        }
    }
    std::future::pending().await
}
