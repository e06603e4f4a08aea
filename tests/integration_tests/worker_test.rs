//! Worker runtime integration tests
//!
//! Runs the full multi-queue worker against an in-memory store:
//! 1. Tasks flow from discovery to publish without manual draining
//! 2. Pause, resume and restart arrive through the control channel
//! 3. Heartbeat and stats are written for operators
//! 4. A loop that keeps failing stops the worker

use recast::control::ControlPlane;
use recast::models::Platform;
use recast::queue::{QueueName, Task};
use recast::scheduler::JobSchedule;
use recast::worker::{heartbeat, supervisor, ControlAction, MultiQueueWorker, WorkerContext, WorkerError, WorkerTimings};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::common::{account, fast_policy, monitor, recorded_content, settings, TestPipeline};

fn fast_timings() -> WorkerTimings {
    WorkerTimings {
        poll_timeout: Duration::from_millis(20),
        publish_poll_timeout: Duration::from_millis(20),
        pause_poll: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(20),
        heartbeat_ttl: Duration::from_secs(5),
        control_poll: Duration::from_millis(10),
        control_ttl: Duration::from_secs(5),
        restart_cooldown: Duration::from_millis(10),
        max_restarts: 2,
        shutdown_grace: Duration::from_secs(1),
    }
}

fn quiet_jobs() -> JobSchedule {
    JobSchedule {
        initial_delay: None,
        ..JobSchedule::default()
    }
}

fn worker_for(tp: &TestPipeline) -> MultiQueueWorker {
    let ctx = WorkerContext::new(
        tp.store.clone(),
        tp.keys.clone(),
        tp.ctx.clone(),
        fast_policy(),
        fast_timings(),
    );
    MultiQueueWorker::new(ctx, quiet_jobs())
}

/// Poll `check` every 10ms until it holds
async fn until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    while !check().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn seeded() -> TestPipeline {
    let tp = TestPipeline::new();
    tp.records.put_monitor(monitor("m1", "u1")).await;
    tp.records.put_settings(settings("u1", &[Platform::Twitter])).await;
    tp.records
        .put_accounts("u1", vec![account("a1", Platform::Twitter)])
        .await;
    tp.discovery
        .put_items("u1", "m1", vec![recorded_content("p1", "fp-1")])
        .await;
    tp
}

// ============================================================================
// Task Flow
// ============================================================================

#[tokio::test]
async fn test_worker_publishes_discovered_content() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    tp.ctx
        .queue
        .enqueue(&Task::discovery_manual("u1", Some("m1".into())))
        .await
        .unwrap();

    let publisher = tp.publisher.clone();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        worker.run_until(until(move || {
            let publisher = publisher.clone();
            async move { !publisher.published().await.is_empty() }
        })),
    )
    .await
    .expect("worker finished in time");

    assert!(result.is_ok());
    assert_eq!(tp.publisher.published().await.len(), 1);
    assert_eq!(tp.ctx.quota.count("u1").await.unwrap(), 1);
    for queue in QueueName::all() {
        assert_eq!(tp.depth(queue).await, 0);
    }
    // Heartbeat is cleared on shutdown
    assert!(tp.store.get(&tp.keys.heartbeat()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_out_of_range_settings_still_publish() {
    let tp = seeded().await;
    let mut extreme = settings("u1", &[Platform::Twitter]);
    extreme.schedule_delay_minutes = i64::MAX;
    extreme.check_interval_minutes = i64::MAX;
    extreme.max_posts_per_day = i64::MIN;
    tp.records.put_settings(extreme).await;
    let worker = worker_for(&tp);
    tp.ctx
        .queue
        .enqueue(&Task::discovery_manual("u1", Some("m1".into())))
        .await
        .unwrap();

    let publisher = tp.publisher.clone();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        worker.run_until(until(move || {
            let publisher = publisher.clone();
            async move { !publisher.published().await.is_empty() }
        })),
    )
    .await
    .expect("worker finished in time");

    assert!(result.is_ok());
    assert_eq!(tp.publisher.published().await.len(), 1);
    assert_eq!(tp.ctx.stats.snapshot().tasks_failed, 0);
}

#[tokio::test]
async fn test_undecodable_entry_is_dropped() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    tp.store
        .push(&tp.keys.queue(QueueName::Discovery), "not a task")
        .await
        .unwrap();

    let stats = tp.ctx.stats.clone();
    tokio::time::timeout(
        Duration::from_secs(10),
        worker.run_until(until(move || {
            let stats = stats.clone();
            async move { stats.snapshot().tasks_dropped > 0 }
        })),
    )
    .await
    .expect("worker finished in time")
    .unwrap();

    assert_eq!(tp.depth(QueueName::Discovery).await, 0);
    assert_eq!(tp.depth(QueueName::Generation).await, 0);
}

// ============================================================================
// Control Signals
// ============================================================================

#[tokio::test]
async fn test_pause_holds_tasks_until_resume() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    let ctx = worker.context().clone();
    let plane = ControlPlane::new(tp.store.clone(), tp.keys.clone());
    let queue = tp.ctx.queue.clone();

    let script = async move {
        plane.send_signal(ControlAction::Pause).await.unwrap();
        until(|| {
            let ctx = ctx.clone();
            async move { ctx.is_paused() }
        })
        .await;
        // Let any pop that started before the pause time out
        tokio::time::sleep(Duration::from_millis(60)).await;

        queue
            .enqueue(&Task::discovery_manual("u1", Some("m1".into())))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let held = queue.depth(QueueName::Discovery).await.unwrap();

        plane.send_signal(ControlAction::Resume).await.unwrap();
        until(|| {
            let queue = queue.clone();
            async move { queue.depth(QueueName::Discovery).await.unwrap() == 0 }
        })
        .await;
        held
    };

    let (held_tx, held_rx) = tokio::sync::oneshot::channel();
    tokio::time::timeout(
        Duration::from_secs(10),
        worker.run_until(async move {
            let _ = held_tx.send(script.await);
        }),
    )
    .await
    .expect("worker finished in time")
    .unwrap();

    assert_eq!(held_rx.await.unwrap(), 1);
    assert!(!worker.context().is_paused());
}

#[tokio::test]
async fn test_restart_clears_pause() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    let ctx = worker.context().clone();
    let plane = ControlPlane::new(tp.store.clone(), tp.keys.clone());

    let script = async move {
        plane.send_signal(ControlAction::Pause).await.unwrap();
        until(|| {
            let ctx = ctx.clone();
            async move { ctx.is_paused() }
        })
        .await;

        plane.send_signal(ControlAction::Restart).await.unwrap();
        until(|| {
            let ctx = ctx.clone();
            async move { !ctx.is_paused() }
        })
        .await;
    };

    tokio::time::timeout(Duration::from_secs(10), worker.run_until(script))
        .await
        .expect("worker finished in time")
        .unwrap();
    assert!(!worker.context().is_paused());
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_heartbeat_writes_liveness_and_stats() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    let ctx = worker.context();
    ctx.pipeline.stats.add_discovered(3);
    ctx.pause();

    heartbeat::beat(ctx).await.unwrap();

    assert!(tp.store.get(&tp.keys.heartbeat()).await.unwrap().is_some());
    assert!(tp.memory.ttl(&tp.keys.heartbeat()).await.is_some());

    let stats = tp.store.hash_get_all(&tp.keys.stats()).await.unwrap();
    assert_eq!(stats.get("paused").map(String::as_str), Some("true"));
    assert_eq!(stats.get("posts_discovered").map(String::as_str), Some("3"));
    assert!(stats.contains_key("started_at"));

    let status = ControlPlane::new(tp.store.clone(), tp.keys.clone())
        .status()
        .await
        .unwrap();
    assert!(status.alive);
}

// ============================================================================
// Supervision
// ============================================================================

#[tokio::test]
async fn test_supervisor_restarts_then_gives_up() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    let (_tx, rx) = watch::channel(false);
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let result = supervisor::supervise("discovery", worker.context().clone(), rx, move |_, _| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::Panicked("boom".into()))
        }
    })
    .await;

    // One initial run plus max_restarts restarts
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(
        result,
        Err(WorkerError::RestartsExhausted { unit: "discovery", restarts: 2, .. })
    ));
}

#[tokio::test]
async fn test_supervisor_recovers_after_one_failure() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    let (_tx, rx) = watch::channel(false);
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let result = supervisor::supervise("publish", worker.context().clone(), rx, move |_, _| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(WorkerError::Panicked("first run".into()))
            } else {
                Ok(())
            }
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_store_outage_stops_worker() {
    let tp = seeded().await;
    let worker = worker_for(&tp);
    tp.memory.inject_failures(1_000_000);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        worker.run_until(std::future::pending::<()>()),
    )
    .await
    .expect("worker gave up in time");

    assert!(matches!(result, Err(WorkerError::RestartsExhausted { .. })));
}
