//! Pending-work priority and recurring job tests
//!
//! 1. Outstanding posts are drained before a new scan
//! 2. The user sweep honors each user's check interval
//! 3. Cleanup trims oversized queues

use chrono::{Duration as ChronoDuration, Utc};
use recast::models::{Platform, PostStatus};
use recast::pipeline::TaskOutcome;
use recast::queue::{QueueName, Task, TaskPayload};
use recast::scheduler::{JobSchedule, PeriodicJobs};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::common::{monitor, post, recorded_content, settings, TestPipeline};

async fn seeded() -> TestPipeline {
    let tp = TestPipeline::new();
    tp.records.put_monitor(monitor("m1", "u1")).await;
    tp.records.put_settings(settings("u1", &[Platform::Twitter])).await;
    tp.discovery
        .put_items("u1", "m1", vec![recorded_content("fresh", "fp-fresh")])
        .await;
    tp
}

fn jobs(tp: &TestPipeline, schedule: JobSchedule) -> PeriodicJobs {
    PeriodicJobs::new(
        tp.ctx.clone(),
        tp.store.clone(),
        tp.keys.clone(),
        schedule,
        Arc::new(AtomicBool::new(false)),
    )
}

// ============================================================================
// Pending Work Priority
// ============================================================================

#[tokio::test]
async fn test_pending_posts_drained_before_scan() {
    let tp = seeded().await;
    tp.records.put_post(post("old-1", "u1", PostStatus::Discovered)).await;
    tp.records.put_post(post("old-2", "u1", PostStatus::Discovered)).await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_for_user("u1", false))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Discovery).await;

    assert!(matches!(outcomes[0], TaskOutcome::Skipped(_)));
    assert_eq!(tp.discovery.scans(), 0);
    assert_eq!(tp.records.status_of("old-1").await, Some(PostStatus::Processing));
    assert_eq!(tp.records.status_of("old-2").await, Some(PostStatus::Processing));

    let tasks = tp.drain(QueueName::Generation).await;
    assert_eq!(tasks.len(), 2);
    for task in tasks {
        let TaskPayload::Generation { post, settings, .. } = task.payload else {
            panic!("expected a generation task");
        };
        assert_eq!(post.status, PostStatus::Processing);
        assert_eq!(settings.enabled_platforms, vec![Platform::Twitter]);
    }
}

#[tokio::test]
async fn test_in_flight_generation_defers_scan() {
    let tp = seeded().await;
    tp.records.put_post(post("busy", "u1", PostStatus::Generating)).await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_for_user("u1", false))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Discovery).await;

    assert!(matches!(outcomes[0], TaskOutcome::Skipped(_)));
    assert_eq!(tp.discovery.scans(), 0);
    assert_eq!(tp.depth(QueueName::Generation).await, 0);
}

#[tokio::test]
async fn test_scan_runs_without_pending_work() {
    let tp = seeded().await;
    tp.records.put_post(post("done", "u1", PostStatus::Published)).await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_for_user("u1", false))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Discovery).await;

    assert_eq!(outcomes, vec![TaskOutcome::Completed]);
    assert_eq!(tp.discovery.scans(), 1);
    assert_eq!(tp.depth(QueueName::Generation).await, 1);
}

#[tokio::test]
async fn test_manual_scan_bypasses_pending_work() {
    let tp = seeded().await;
    tp.records.put_post(post("old", "u1", PostStatus::Discovered)).await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_manual("u1", Some("m1".into())))
        .await
        .unwrap();
    tp.run_queue(QueueName::Discovery).await;

    assert_eq!(tp.discovery.scans(), 1);
    assert_eq!(tp.records.status_of("old").await, Some(PostStatus::Discovered));
}

#[tokio::test]
async fn test_sweep_fans_out_per_user() {
    let tp = seeded().await;
    tp.records.put_monitor(monitor("m2", "u2")).await;
    tp.records.put_settings(settings("u2", &[Platform::Linkedin])).await;
    tp.records.put_post(post("old", "u2", PostStatus::Discovered)).await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_scheduled(true))
        .await
        .unwrap();
    tp.run_queue(QueueName::Discovery).await;

    // u1 gets a scan; u2's pending post is drained instead
    let tasks = tp.drain(QueueName::Discovery).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].user_id(), Some("u1"));
    assert_eq!(tp.depth(QueueName::Generation).await, 1);
}

// ============================================================================
// Recurring Jobs
// ============================================================================

#[tokio::test]
async fn test_user_sweep_respects_check_interval() {
    let tp = seeded().await;
    let jobs = jobs(&tp, JobSchedule::default());
    let now = Utc::now();

    assert_eq!(jobs.sweep_due_users(now).await.unwrap(), 1);
    assert_eq!(jobs.sweep_due_users(now + ChronoDuration::minutes(10)).await.unwrap(), 0);
    // settings() keeps the default 60 minute interval
    assert_eq!(jobs.sweep_due_users(now + ChronoDuration::minutes(61)).await.unwrap(), 1);

    let tasks = tp.drain(QueueName::Discovery).await;
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| matches!(
        t.payload,
        TaskPayload::DiscoveryForUser { pending_work_checked: false, .. }
    )));
}

#[tokio::test]
async fn test_initial_sweep_enqueues_all_users_scan() {
    let tp = seeded().await;
    jobs(&tp, JobSchedule::default()).initial_sweep().await;

    let tasks = tp.drain(QueueName::Discovery).await;
    assert_eq!(tasks.len(), 1);
    assert!(matches!(
        tasks[0].payload,
        TaskPayload::DiscoveryScheduled { initial_run: true }
    ));
}

#[tokio::test]
async fn test_cleanup_trims_oversized_queue() {
    let tp = seeded().await;
    let jobs = jobs(
        &tp,
        JobSchedule {
            trim_threshold: 5,
            trim_keep: 2,
            ..JobSchedule::default()
        },
    );

    for _ in 0..6 {
        tp.ctx
            .queue
            .enqueue(&Task::discovery_for_user("u1", false))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        tp.ctx
            .queue
            .enqueue(&Task::discovery_scheduled(false))
            .await
            .unwrap();
    }

    assert_eq!(jobs.cleanup().await, 7);
    assert_eq!(tp.depth(QueueName::Discovery).await, 2);

    // Newest entries survive
    let kept = tp.drain(QueueName::Discovery).await;
    assert!(kept
        .iter()
        .all(|t| matches!(t.payload, TaskPayload::DiscoveryScheduled { .. })));
}

#[tokio::test]
async fn test_cleanup_leaves_small_queues_alone() {
    let tp = seeded().await;
    let jobs = jobs(&tp, JobSchedule::default());
    tp.ctx
        .queue
        .enqueue(&Task::discovery_for_user("u1", false))
        .await
        .unwrap();

    assert_eq!(jobs.cleanup().await, 0);
    assert_eq!(tp.depth(QueueName::Discovery).await, 1);
}
