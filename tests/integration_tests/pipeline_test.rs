//! End-to-end pipeline integration tests
//!
//! Drives tasks through the three stage handlers against an in-memory
//! store:
//! 1. Discovery with the dedup gate
//! 2. Generation and spread scheduling
//! 3. Publishing with quota and eligibility checks

use recast::models::{Platform, PostStatus};
use recast::pipeline::{PipelineOptions, TaskOutcome};
use recast::queue::{QueueName, Task, TaskPayload};
use std::time::Duration;

use crate::common::{
    account, generated, monitor, post, recorded_content, settings, TestPipeline,
};

async fn seeded(platforms: &[Platform]) -> TestPipeline {
    let tp = TestPipeline::new();
    tp.records.put_monitor(monitor("m1", "u1")).await;
    tp.records.put_settings(settings("u1", platforms)).await;
    tp.records
        .put_accounts(
            "u1",
            platforms
                .iter()
                .map(|p| account(&format!("acct-{p}"), *p))
                .collect(),
        )
        .await;
    tp
}

fn no_defer() -> PipelineOptions {
    PipelineOptions {
        defer_over_quota: false,
        settings_cache_ttl: Duration::ZERO,
        ..PipelineOptions::default()
    }
}

// ============================================================================
// Discovery → Generation → Publish
// ============================================================================

#[tokio::test]
async fn test_discovered_post_is_generated_and_published() {
    let tp = seeded(&[Platform::Twitter]).await;
    tp.records.put_post(post("p1", "u1", PostStatus::Discovered)).await;
    tp.discovery
        .put_items("u1", "m1", vec![recorded_content("p1", "fp-1")])
        .await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_manual("u1", Some("m1".into())))
        .await
        .unwrap();

    assert_eq!(tp.run_queue(QueueName::Discovery).await, vec![TaskOutcome::Completed]);
    assert_eq!(tp.depth(QueueName::Generation).await, 1);
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Processing));

    assert_eq!(tp.run_queue(QueueName::Generation).await, vec![TaskOutcome::Completed]);
    assert_eq!(tp.generator.calls(), 1);
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Generated));
    assert_eq!(tp.depth(QueueName::Publish).await, 1);

    assert_eq!(tp.run_queue(QueueName::Publish).await, vec![TaskOutcome::Completed]);
    let published = tp.publisher.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, Platform::Twitter);
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Published));
    assert_eq!(tp.ctx.quota.count("u1").await.unwrap(), 1);

    let statuses: Vec<PostStatus> = tp
        .records
        .updates()
        .await
        .into_iter()
        .filter(|(id, _)| id == "p1")
        .map(|(_, status)| status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            PostStatus::Processing,
            PostStatus::Generating,
            PostStatus::Generated,
            PostStatus::Published,
        ]
    );
}

#[tokio::test]
async fn test_rediscovered_content_is_not_regenerated() {
    let tp = seeded(&[Platform::Twitter]).await;
    tp.discovery
        .put_items("u1", "m1", vec![recorded_content("p1", "fp-1")])
        .await;

    for _ in 0..2 {
        tp.ctx
            .queue
            .enqueue(&Task::discovery_manual("u1", Some("m1".into())))
            .await
            .unwrap();
        tp.run_queue(QueueName::Discovery).await;
    }

    assert_eq!(tp.discovery.scans(), 2);
    assert_eq!(tp.depth(QueueName::Generation).await, 1);
    assert_eq!(tp.ctx.stats.snapshot().posts_discovered, 1);
}

#[tokio::test]
async fn test_user_scan_covers_every_active_monitor() {
    let tp = seeded(&[Platform::Twitter]).await;
    tp.records.put_monitor(monitor("m2", "u1")).await;
    let mut inactive = monitor("m3", "u1");
    inactive.active = false;
    tp.records.put_monitor(inactive).await;

    tp.discovery
        .put_items("u1", "m1", vec![recorded_content("a", "fp-a")])
        .await;
    tp.discovery
        .put_items(
            "u1",
            "m2",
            vec![recorded_content("b", "fp-b"), recorded_content("c", "fp-c")],
        )
        .await;
    tp.discovery
        .put_items("u1", "m3", vec![recorded_content("d", "fp-d")])
        .await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_manual("u1", None))
        .await
        .unwrap();
    tp.run_queue(QueueName::Discovery).await;

    assert_eq!(tp.depth(QueueName::Generation).await, 3);
    assert!(tp.records.monitor("m1").await.unwrap().last_checked.is_some());
    assert!(tp.records.monitor("m3").await.unwrap().last_checked.is_none());
}

#[tokio::test]
async fn test_manual_scan_of_unknown_monitor_is_invalid() {
    let tp = seeded(&[Platform::Twitter]).await;
    let handler = tp
        .ctx
        .handlers()
        .into_iter()
        .find(|h| h.queue() == QueueName::Discovery)
        .unwrap();

    let err = handler
        .handle(Task::discovery_manual("u1", Some("missing".into())))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_generation_disabled_leaves_post_parked() {
    let tp = seeded(&[Platform::Twitter]).await;
    let mut parked = settings("u1", &[Platform::Twitter]);
    parked.content_generation_enabled = false;
    tp.records.put_settings(parked).await;
    tp.discovery
        .put_items("u1", "m1", vec![recorded_content("p1", "fp-1")])
        .await;

    tp.ctx
        .queue
        .enqueue(&Task::discovery_manual("u1", Some("m1".into())))
        .await
        .unwrap();
    tp.run_queue(QueueName::Discovery).await;

    assert_eq!(tp.depth(QueueName::Generation).await, 0);
    assert!(tp.ctx.dedup.seen("m1", "fp-1").await.unwrap());
}

// ============================================================================
// Generation
// ============================================================================

#[tokio::test]
async fn test_later_slots_wait_in_delayed_index() {
    let tp = seeded(&[Platform::Twitter, Platform::Linkedin, Platform::Facebook]).await;
    tp.records.put_post(post("p1", "u1", PostStatus::Processing)).await;

    tp.ctx
        .queue
        .enqueue(&Task::generation(
            post("p1", "u1", PostStatus::Processing),
            settings("u1", &[Platform::Twitter, Platform::Linkedin, Platform::Facebook]),
        ))
        .await
        .unwrap();
    tp.run_queue(QueueName::Generation).await;

    // Immediate mode: the first rewrite is due now, the rest two minutes apart
    assert_eq!(tp.depth(QueueName::Publish).await, 1);
    assert_eq!(tp.ctx.delayed.pending().await.unwrap(), 2);

    let promoted = tp
        .ctx
        .delayed
        .promote_due(chrono::Utc::now() + chrono::Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(tp.ctx.delayed.pending().await.unwrap(), 1);

    let tasks = tp.drain(QueueName::Publish).await;
    assert!(matches!(tasks[0].payload, TaskPayload::PublishImmediate { .. }));
    assert!(matches!(tasks[1].payload, TaskPayload::PublishScheduled { .. }));
}

#[tokio::test]
async fn test_unqueued_rewrite_does_not_stop_the_rest() {
    let tp = seeded(&[Platform::Twitter, Platform::Linkedin, Platform::Facebook]).await;
    tp.records.put_post(post("p1", "u1", PostStatus::Processing)).await;

    tp.ctx
        .queue
        .enqueue(&Task::generation(
            post("p1", "u1", PostStatus::Processing),
            settings("u1", &[Platform::Twitter, Platform::Linkedin, Platform::Facebook]),
        ))
        .await
        .unwrap();

    tp.memory.time_out_pushes(true);
    let outcomes = tp.run_queue(QueueName::Generation).await;
    tp.memory.time_out_pushes(false);

    // The due rewrite is lost, the two later ones still reach the delayed index
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0], TaskOutcome::Failed(reason) if reason.contains("1 of 3")));
    assert_eq!(tp.depth(QueueName::Publish).await, 0);
    assert_eq!(tp.ctx.delayed.pending().await.unwrap(), 2);
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Scheduled));
}

#[tokio::test]
async fn test_generation_failure_marks_post() {
    let tp = seeded(&[Platform::Twitter]).await;
    tp.records.put_post(post("p1", "u1", PostStatus::Processing)).await;
    tp.generator.fail(true);

    tp.ctx
        .queue
        .enqueue(&Task::generation(
            post("p1", "u1", PostStatus::Processing),
            settings("u1", &[Platform::Twitter]),
        ))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Generation).await;

    assert!(matches!(outcomes[0], TaskOutcome::Failed(_)));
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::GenerationFailed));
    assert_eq!(tp.depth(QueueName::Publish).await, 0);
}

#[tokio::test]
async fn test_auto_publish_off_stops_after_generation() {
    let tp = seeded(&[Platform::Twitter]).await;
    let mut manual = settings("u1", &[Platform::Twitter]);
    manual.auto_publish = false;

    tp.ctx
        .queue
        .enqueue(&Task::generation(post("p1", "u1", PostStatus::Processing), manual))
        .await
        .unwrap();
    assert_eq!(tp.run_queue(QueueName::Generation).await, vec![TaskOutcome::Completed]);

    assert_eq!(tp.depth(QueueName::Publish).await, 0);
    assert_eq!(tp.ctx.delayed.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_exhausted_quota_skips_scheduling() {
    let tp = seeded(&[Platform::Twitter]).await;
    let mut limited = settings("u1", &[Platform::Twitter]);
    limited.max_posts_per_day = 1;
    tp.ctx.quota.increment("u1").await.unwrap();

    tp.ctx
        .queue
        .enqueue(&Task::generation(post("p1", "u1", PostStatus::Processing), limited))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Generation).await;

    assert!(matches!(outcomes[0], TaskOutcome::Skipped(_)));
    assert_eq!(tp.depth(QueueName::Publish).await, 0);
}

// ============================================================================
// Publish
// ============================================================================

#[tokio::test]
async fn test_daily_limit_skips_second_publish() {
    let tp = TestPipeline::with_options(no_defer());
    let mut limited = settings("u1", &[Platform::Twitter, Platform::Linkedin]);
    limited.max_posts_per_day = 1;
    tp.records.put_settings(limited).await;
    tp.records
        .put_accounts(
            "u1",
            vec![account("a1", Platform::Twitter), account("a2", Platform::Linkedin)],
        )
        .await;
    tp.records.put_post(post("p1", "u1", PostStatus::Generated)).await;
    tp.records.put_post(post("p2", "u1", PostStatus::Generated)).await;

    for (source, platform) in [("p1", Platform::Twitter), ("p2", Platform::Linkedin)] {
        tp.ctx
            .queue
            .enqueue(&Task::publish_immediate(generated("u1", source, platform)))
            .await
            .unwrap();
    }
    let outcomes = tp.run_queue(QueueName::Publish).await;

    assert_eq!(outcomes[0], TaskOutcome::Completed);
    assert!(matches!(outcomes[1], TaskOutcome::Skipped(_)));
    assert_eq!(tp.publisher.published().await.len(), 1);
    assert_eq!(tp.ctx.quota.count("u1").await.unwrap(), 1);
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Published));
    assert_eq!(tp.records.status_of("p2").await, Some(PostStatus::Generated));
    assert_eq!(tp.ctx.delayed.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_over_quota_publish_is_deferred() {
    let tp = seeded(&[Platform::Twitter]).await;
    let mut limited = settings("u1", &[Platform::Twitter]);
    limited.max_posts_per_day = 1;
    tp.records.put_settings(limited).await;
    tp.ctx.quota.increment("u1").await.unwrap();

    tp.ctx
        .queue
        .enqueue(&Task::publish_immediate(generated("u1", "p1", Platform::Twitter)))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Publish).await;

    assert!(matches!(outcomes[0], TaskOutcome::Skipped(_)));
    assert!(tp.publisher.published().await.is_empty());
    assert_eq!(tp.ctx.delayed.pending().await.unwrap(), 1);

    // Not promoted before the next window opens
    assert_eq!(tp.ctx.delayed.promote_due(chrono::Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_disabled_platform_is_skipped() {
    let tp = seeded(&[Platform::Twitter]).await;
    tp.records.put_post(post("p1", "u1", PostStatus::Generated)).await;

    tp.ctx
        .queue
        .enqueue(&Task::publish_immediate(generated("u1", "p1", Platform::Instagram)))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Publish).await;

    assert!(matches!(outcomes[0], TaskOutcome::Skipped(_)));
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Generated));
    assert_eq!(tp.ctx.quota.count("u1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_account_fails_publish() {
    let tp = seeded(&[Platform::Twitter]).await;
    tp.records.put_accounts("u1", Vec::new()).await;
    tp.records.put_post(post("p1", "u1", PostStatus::Generated)).await;

    tp.ctx
        .queue
        .enqueue(&Task::publish_immediate(generated("u1", "p1", Platform::Twitter)))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Publish).await;

    assert!(matches!(outcomes[0], TaskOutcome::Failed(_)));
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Failed));
}

#[tokio::test]
async fn test_later_platform_failure_keeps_published_status() {
    let tp = seeded(&[Platform::Twitter, Platform::Linkedin]).await;
    tp.records
        .put_accounts("u1", vec![account("a1", Platform::Twitter)])
        .await;
    tp.records.put_post(post("p1", "u1", PostStatus::Scheduled)).await;

    let due_at = chrono::Utc::now() - chrono::Duration::minutes(1);
    for platform in [Platform::Twitter, Platform::Linkedin] {
        tp.ctx
            .queue
            .enqueue(&Task::publish_scheduled(generated("u1", "p1", platform), due_at))
            .await
            .unwrap();
    }
    let outcomes = tp.run_queue(QueueName::Publish).await;

    assert_eq!(outcomes[0], TaskOutcome::Completed);
    assert!(matches!(outcomes[1], TaskOutcome::Failed(_)));
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Published));
    assert!(!tp
        .records
        .updates()
        .await
        .contains(&("p1".to_string(), PostStatus::Failed)));
}

#[tokio::test]
async fn test_publisher_outage_fails_without_counting() {
    let tp = seeded(&[Platform::Twitter]).await;
    tp.records.put_post(post("p1", "u1", PostStatus::Generated)).await;
    tp.publisher.fail(true);

    tp.ctx
        .queue
        .enqueue(&Task::publish_immediate(generated("u1", "p1", Platform::Twitter)))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Publish).await;

    assert!(matches!(outcomes[0], TaskOutcome::Failed(_)));
    assert_eq!(tp.ctx.quota.count("u1").await.unwrap(), 0);
    assert_eq!(tp.records.status_of("p1").await, Some(PostStatus::Failed));
}

#[tokio::test]
async fn test_publish_not_yet_due_is_reindexed() {
    let tp = seeded(&[Platform::Twitter]).await;
    let due_at = chrono::Utc::now() + chrono::Duration::hours(1);

    tp.ctx
        .queue
        .enqueue(&Task::publish_scheduled(
            generated("u1", "p1", Platform::Twitter),
            due_at,
        ))
        .await
        .unwrap();
    let outcomes = tp.run_queue(QueueName::Publish).await;

    assert!(matches!(outcomes[0], TaskOutcome::Skipped(_)));
    assert!(tp.publisher.published().await.is_empty());
    assert_eq!(tp.ctx.delayed.pending().await.unwrap(), 1);
}

#[tokio::test]
async fn test_redelivered_publish_keeps_idempotency_key() {
    let tp = seeded(&[Platform::Twitter]).await;
    let rewrite = generated("u1", "p1", Platform::Twitter);

    for _ in 0..2 {
        tp.ctx
            .queue
            .enqueue(&Task::publish_immediate(rewrite.clone()))
            .await
            .unwrap();
    }
    tp.run_queue(QueueName::Publish).await;

    let published = tp.publisher.published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].1, published[1].1);
    assert_eq!(published[0].1, rewrite.idempotency_key());
}
