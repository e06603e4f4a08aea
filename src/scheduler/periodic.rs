//! Recurring jobs
//!
//! One cancellable loop drives every recurring job from interval tickers:
//!
//! | Job | Default | What it does |
//! |-----|---------|--------------|
//! | initial sweep | 5s after start | enqueue an all-users discovery sweep |
//! | user sweep | 30 min | enqueue a scan for each user whose check interval elapsed |
//! | cleanup | 60 min | trim oversized stage queues and the activity log |
//! | stats | 15 min | log queue depths and counters, refresh depth gauges |
//!
//! Jobs are skipped while the worker is paused.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;
use crate::metrics;
use crate::pipeline::{PipelineContext, PipelineError};
use crate::queue::{QueueName, Task};
use crate::store::{KeySpace, ResilientStore};

/// How long a user's last-sweep marker is kept
const LAST_SWEEP_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Job intervals
#[derive(Debug, Clone)]
pub struct JobSchedule {
    /// `None` disables the initial sweep
    pub initial_delay: Option<Duration>,
    pub sweep_every: Duration,
    pub cleanup_every: Duration,
    pub stats_every: Duration,
    pub trim_threshold: usize,
    pub trim_keep: usize,
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self::from_config(&ScheduleConfig::default())
    }
}

impl JobSchedule {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            initial_delay: (config.initial_run_delay_secs > 0)
                .then(|| Duration::from_secs(config.initial_run_delay_secs)),
            sweep_every: Duration::from_secs(config.discovery_sweep_minutes.max(1) * 60),
            cleanup_every: Duration::from_secs(config.cleanup_minutes.max(1) * 60),
            stats_every: Duration::from_secs(config.stats_minutes.max(1) * 60),
            trim_threshold: config.queue_trim_threshold,
            trim_keep: config.queue_trim_keep,
        }
    }
}

/// Driver for the recurring jobs
#[derive(Clone)]
pub struct PeriodicJobs {
    ctx: PipelineContext,
    store: ResilientStore,
    keys: KeySpace,
    schedule: JobSchedule,
    paused: Arc<AtomicBool>,
}

impl PeriodicJobs {
    pub fn new(
        ctx: PipelineContext,
        store: ResilientStore,
        keys: KeySpace,
        schedule: JobSchedule,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            store,
            keys,
            schedule,
            paused,
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Run until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now();
        let ticker = |every: Duration| {
            let mut ticker = interval_at(start + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        };
        let mut sweep = ticker(self.schedule.sweep_every);
        let mut cleanup = ticker(self.schedule.cleanup_every);
        let mut stats = ticker(self.schedule.stats_every);

        let initial = tokio::time::sleep(self.schedule.initial_delay.unwrap_or(Duration::ZERO));
        tokio::pin!(initial);
        let mut initial_pending = self.schedule.initial_delay.is_some();

        info!("Periodic jobs started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = &mut initial, if initial_pending => {
                    initial_pending = false;
                    if !self.is_paused() {
                        self.initial_sweep().await;
                    }
                }
                _ = sweep.tick() => {
                    if self.is_paused() {
                        debug!("Paused, skipping user sweep");
                    } else if let Err(e) = self.sweep_due_users(Utc::now()).await {
                        warn!(error = %e, "User sweep failed");
                    }
                }
                _ = cleanup.tick() => {
                    if !self.is_paused() {
                        self.cleanup().await;
                    }
                }
                _ = stats.tick() => {
                    if !self.is_paused() {
                        self.log_stats().await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Periodic jobs shutting down");
    }

    /// Enqueue the all-users sweep
    pub async fn initial_sweep(&self) {
        match self.ctx.queue.enqueue(&Task::discovery_scheduled(true)).await {
            Ok(_) => info!("Initial discovery sweep enqueued"),
            Err(e) => warn!(error = %e, "Failed to enqueue initial discovery sweep"),
        }
    }

    /// Enqueue a scan for every user whose check interval has elapsed
    ///
    /// Returns the number of scans enqueued.
    pub async fn sweep_due_users(&self, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let users = self
            .ctx
            .collaborators
            .records
            .users_with_active_monitors()
            .await?;

        let mut enqueued = 0;
        for user_id in &users {
            let settings = self.ctx.settings.get(user_id).await;
            let every = ChronoDuration::try_minutes(settings.check_interval_minutes.max(1))
                .unwrap_or(ChronoDuration::MAX);
            let key = self.keys.last_sweep(user_id);

            let last = self
                .store
                .get(&key)
                .await?
                .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
                .map(|at| at.with_timezone(&Utc));
            if matches!(last, Some(last) if now - last < every) {
                debug!(user_id = %user_id, "Check interval not elapsed");
                continue;
            }

            self.ctx
                .queue
                .enqueue(&Task::discovery_for_user(user_id.clone(), false))
                .await?;
            self.store
                .set(&key, &now.to_rfc3339(), Some(LAST_SWEEP_TTL))
                .await?;
            enqueued += 1;
        }

        info!(users = users.len(), enqueued, "User sweep finished");
        Ok(enqueued)
    }

    /// Trim oversized queues and the activity log; returns entries dropped
    pub async fn cleanup(&self) -> usize {
        let mut dropped = 0;
        for queue in QueueName::all() {
            match self
                .ctx
                .queue
                .trim_oversized(queue, self.schedule.trim_threshold, self.schedule.trim_keep)
                .await
            {
                Ok(n) => dropped += n,
                Err(e) => warn!(queue = %queue, error = %e, "Queue trim failed"),
            }
        }
        if let Err(e) = self.ctx.activity.trim().await {
            warn!(error = %e, "Activity log trim failed");
        }
        debug!(dropped, "Cleanup finished");
        dropped
    }

    pub async fn log_stats(&self) {
        let mut depths = Vec::with_capacity(3);
        for queue in QueueName::all() {
            match self.ctx.queue.depth(queue).await {
                Ok(depth) => {
                    metrics::set_queue_depth(queue.list_name(), depth);
                    depths.push(format!("{queue}={depth}"));
                }
                Err(e) => warn!(queue = %queue, error = %e, "Queue depth unavailable"),
            }
        }
        let delayed = self.ctx.delayed.pending().await.unwrap_or_default();
        let snapshot = self.ctx.stats.snapshot();

        info!(
            queues = %depths.join(" "),
            delayed,
            monitors_checked = snapshot.monitors_checked,
            posts_discovered = snapshot.posts_discovered,
            posts_generated = snapshot.posts_generated,
            posts_published = snapshot.posts_published,
            tasks_failed = snapshot.tasks_failed,
            "Worker stats"
        );
    }
}
