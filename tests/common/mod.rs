//! Common test utilities
//!
//! In-process fakes for the four collaborators plus a pipeline wired to a
//! `MemoryStore`.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use recast::collaborators::{
    CollabResult, CollaboratorError, Collaborators, ContentDiscovery, ContentGenerator,
    PlatformPublisher, SystemOfRecord,
};
use recast::models::{
    Account, DiscoveredContent, GeneratedPost, Monitor, Platform, Post, PostStatus, PostingWindow,
    PublishOutcome, ScheduleMode, UserSettings,
};
use recast::pipeline::{PipelineContext, PipelineOptions, TaskOutcome};
use recast::queue::{QueueName, Task};
use recast::store::{KeySpace, MemoryStore, ResilientStore, StoreRetryPolicy};

// ============================================================================
// Fixtures
// ============================================================================

pub fn monitor(id: &str, user_id: &str) -> Monitor {
    Monitor {
        id: id.to_string(),
        user_id: user_id.to_string(),
        url: format!("https://blog.example.com/{id}/feed"),
        active: true,
        last_checked: None,
    }
}

pub fn content(slug: &str) -> DiscoveredContent {
    DiscoveredContent {
        post_id: None,
        title: format!("Post {slug}"),
        body: format!("Body of {slug}"),
        url: format!("https://blog.example.com/posts/{slug}"),
        published_at: Some(Utc::now()),
        platform: "blog".to_string(),
        content_fingerprint: String::new(),
    }
}

/// Content that already has a record in the system of record
pub fn recorded_content(post_id: &str, fingerprint: &str) -> DiscoveredContent {
    DiscoveredContent {
        post_id: Some(post_id.to_string()),
        content_fingerprint: fingerprint.to_string(),
        ..content(post_id)
    }
}

pub fn post(id: &str, user_id: &str, status: PostStatus) -> Post {
    Post {
        id: id.to_string(),
        monitor_id: "m1".to_string(),
        user_id: user_id.to_string(),
        content_fingerprint: recast::models::fingerprint(id),
        status,
        platform: None,
        title: format!("Post {id}"),
        body: String::new(),
        url: format!("https://blog.example.com/posts/{id}"),
        scheduled_time: None,
        created_at: None,
        updated_at: None,
    }
}

/// Settings that publish immediately with no posting window
pub fn settings(user_id: &str, platforms: &[Platform]) -> UserSettings {
    UserSettings {
        user_id: user_id.to_string(),
        enabled_platforms: platforms.to_vec(),
        posting_window: PostingWindow {
            enabled: false,
            start_hour: 0,
            end_hour: 23,
        },
        schedule_mode: ScheduleMode::Immediate,
        max_posts_per_day: 10,
        ..UserSettings::defaults_for(user_id)
    }
}

pub fn account(id: &str, platform: Platform) -> Account {
    Account {
        id: id.to_string(),
        platform,
        active: true,
        credentials: serde_json::Value::Null,
    }
}

pub fn generated(user_id: &str, source_post_id: &str, platform: Platform) -> GeneratedPost {
    GeneratedPost {
        id: None,
        source_post_id: Some(source_post_id.to_string()),
        user_id: user_id.to_string(),
        platform,
        content: format!("{platform} rewrite of {source_post_id}"),
        image_url: None,
        title: None,
        scheduled_time: None,
    }
}

fn outage(service: &'static str) -> CollaboratorError {
    CollaboratorError::unavailable(service, "injected outage")
}

// ============================================================================
// Fake discovery
// ============================================================================

#[derive(Default)]
pub struct FakeDiscovery {
    items: Mutex<HashMap<String, (String, Vec<DiscoveredContent>)>>,
    scans: AtomicUsize,
    down: AtomicBool,
}

impl FakeDiscovery {
    /// Content the next scans of `monitor_id` will return
    pub async fn put_items(&self, user_id: &str, monitor_id: &str, items: Vec<DiscoveredContent>) {
        self.items
            .lock()
            .await
            .insert(monitor_id.to_string(), (user_id.to_string(), items));
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn fail(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> CollabResult<()> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(outage("discovery"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentDiscovery for FakeDiscovery {
    async fn scan_monitor(&self, monitor: &Monitor) -> CollabResult<Vec<DiscoveredContent>> {
        self.check()?;
        Ok(self
            .items
            .lock()
            .await
            .get(&monitor.id)
            .map(|(_, items)| items.clone())
            .unwrap_or_default())
    }

    async fn scan_all_monitors(
        &self,
        user_id: &str,
    ) -> CollabResult<HashMap<String, Vec<DiscoveredContent>>> {
        self.check()?;
        Ok(self
            .items
            .lock()
            .await
            .iter()
            .filter(|(_, (owner, _))| owner == user_id)
            .map(|(monitor_id, (_, items))| (monitor_id.clone(), items.clone()))
            .collect())
    }
}

// ============================================================================
// Fake generator
// ============================================================================

/// Produces one rewrite per enabled platform
#[derive(Default)]
pub struct FakeGenerator {
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn fail(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        post: &Post,
        settings: &UserSettings,
    ) -> CollabResult<Vec<GeneratedPost>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(outage("generator"));
        }
        Ok(settings
            .enabled_platforms
            .iter()
            .map(|platform| GeneratedPost {
                user_id: String::new(),
                source_post_id: None,
                ..generated(&post.user_id, &post.id, *platform)
            })
            .collect())
    }
}

// ============================================================================
// Fake publisher
// ============================================================================

#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<Vec<(Platform, String)>>,
    down: AtomicBool,
}

impl FakePublisher {
    pub fn fail(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Platform and idempotency key of every successful publish
    pub async fn published(&self) -> Vec<(Platform, String)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl PlatformPublisher for FakePublisher {
    async fn publish(
        &self,
        post: &GeneratedPost,
        _account: &Account,
        idempotency_key: &str,
    ) -> CollabResult<PublishOutcome> {
        if self.down.load(Ordering::SeqCst) {
            return Err(outage("publisher"));
        }
        let mut published = self.published.lock().await;
        published.push((post.platform, idempotency_key.to_string()));
        Ok(PublishOutcome {
            success: true,
            platform_post_id: Some(format!("{}-{}", post.platform, published.len())),
            platform_url: Some(format!("https://{}.example.com/p/{}", post.platform, published.len())),
            error: None,
        })
    }
}

// ============================================================================
// Fake system of record
// ============================================================================

#[derive(Default)]
struct Records {
    monitors: HashMap<String, Monitor>,
    posts: Vec<Post>,
    settings: HashMap<String, UserSettings>,
    accounts: HashMap<String, Vec<Account>>,
    updates: Vec<(String, PostStatus)>,
}

#[derive(Default)]
pub struct FakeRecords {
    inner: Mutex<Records>,
}

impl FakeRecords {
    pub async fn put_monitor(&self, monitor: Monitor) {
        self.inner
            .lock()
            .await
            .monitors
            .insert(monitor.id.clone(), monitor);
    }

    pub async fn put_post(&self, post: Post) {
        self.inner.lock().await.posts.push(post);
    }

    pub async fn put_settings(&self, settings: UserSettings) {
        self.inner
            .lock()
            .await
            .settings
            .insert(settings.user_id.clone(), settings);
    }

    pub async fn put_accounts(&self, user_id: &str, accounts: Vec<Account>) {
        self.inner
            .lock()
            .await
            .accounts
            .insert(user_id.to_string(), accounts);
    }

    pub async fn status_of(&self, post_id: &str) -> Option<PostStatus> {
        self.inner
            .lock()
            .await
            .posts
            .iter()
            .find(|p| p.id == post_id)
            .map(|p| p.status)
    }

    pub async fn monitor(&self, monitor_id: &str) -> Option<Monitor> {
        self.inner.lock().await.monitors.get(monitor_id).cloned()
    }

    /// Every status update, in call order
    pub async fn updates(&self) -> Vec<(String, PostStatus)> {
        self.inner.lock().await.updates.clone()
    }
}

#[async_trait]
impl SystemOfRecord for FakeRecords {
    async fn get_monitor(&self, monitor_id: &str) -> CollabResult<Option<Monitor>> {
        Ok(self.inner.lock().await.monitors.get(monitor_id).cloned())
    }

    async fn active_monitors(&self, user_id: &str) -> CollabResult<Vec<Monitor>> {
        let inner = self.inner.lock().await;
        let mut monitors: Vec<Monitor> = inner
            .monitors
            .values()
            .filter(|m| m.user_id == user_id && m.active)
            .cloned()
            .collect();
        monitors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(monitors)
    }

    async fn users_with_active_monitors(&self) -> CollabResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut users: Vec<String> = inner
            .monitors
            .values()
            .filter(|m| m.active)
            .map(|m| m.user_id.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn mark_monitor_checked(&self, monitor_id: &str, at: DateTime<Utc>) -> CollabResult<()> {
        if let Some(monitor) = self.inner.lock().await.monitors.get_mut(monitor_id) {
            monitor.last_checked = Some(at);
        }
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> CollabResult<Option<Post>> {
        Ok(self
            .inner
            .lock()
            .await
            .posts
            .iter()
            .find(|p| p.id == post_id)
            .cloned())
    }

    async fn posts_with_status(
        &self,
        user_id: &str,
        status: PostStatus,
        limit: usize,
    ) -> CollabResult<Vec<Post>> {
        Ok(self
            .inner
            .lock()
            .await
            .posts
            .iter()
            .filter(|p| p.user_id == user_id && p.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_post_status(
        &self,
        post_id: &str,
        status: PostStatus,
        _details: serde_json::Value,
    ) -> CollabResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(post) = inner.posts.iter_mut().find(|p| p.id == post_id) {
            post.status = status;
        }
        inner.updates.push((post_id.to_string(), status));
        Ok(())
    }

    async fn user_settings(&self, user_id: &str) -> CollabResult<Option<UserSettings>> {
        Ok(self.inner.lock().await.settings.get(user_id).cloned())
    }

    async fn connected_accounts(
        &self,
        user_id: &str,
        platform: Option<Platform>,
    ) -> CollabResult<Vec<Account>> {
        Ok(self
            .inner
            .lock()
            .await
            .accounts
            .get(user_id)
            .map(|accounts| {
                accounts
                    .iter()
                    .filter(|a| platform.map_or(true, |p| a.platform == p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Retry policy that keeps failing tests fast
pub fn fast_policy() -> StoreRetryPolicy {
    StoreRetryPolicy::linear(2, Duration::from_millis(1))
}

pub struct TestPipeline {
    pub memory: Arc<MemoryStore>,
    pub store: ResilientStore,
    pub keys: KeySpace,
    pub discovery: Arc<FakeDiscovery>,
    pub generator: Arc<FakeGenerator>,
    pub publisher: Arc<FakePublisher>,
    pub records: Arc<FakeRecords>,
    pub ctx: PipelineContext,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_options(PipelineOptions {
            settings_cache_ttl: Duration::ZERO,
            ..PipelineOptions::default()
        })
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        let memory = Arc::new(MemoryStore::new());
        let store = ResilientStore::new(memory.clone(), fast_policy());
        let keys = KeySpace::default();

        let discovery = Arc::new(FakeDiscovery::default());
        let generator = Arc::new(FakeGenerator::default());
        let publisher = Arc::new(FakePublisher::default());
        let records = Arc::new(FakeRecords::default());
        let collaborators = Collaborators {
            discovery: discovery.clone(),
            generator: generator.clone(),
            publisher: publisher.clone(),
            records: records.clone(),
        };

        let ctx = PipelineContext::new(store.clone(), keys.clone(), collaborators, options);
        Self {
            memory,
            store,
            keys,
            discovery,
            generator,
            publisher,
            records,
            ctx,
        }
    }

    /// Pop every task currently on a queue without handling it
    pub async fn drain(&self, queue: QueueName) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Some(raw) = self
            .ctx
            .queue
            .pop_raw(queue, Duration::from_millis(5), fast_policy())
            .await
            .expect("queue pop")
        {
            tasks.push(Task::decode_for(&raw, queue).expect("decodable task"));
        }
        tasks
    }

    /// Pop and handle every task on a queue, including ones enqueued meanwhile
    pub async fn run_queue(&self, queue: QueueName) -> Vec<TaskOutcome> {
        let handler = self
            .ctx
            .handlers()
            .into_iter()
            .find(|h| h.queue() == queue)
            .expect("handler for queue");

        let mut outcomes = Vec::new();
        for task in self.drain(queue).await {
            outcomes.push(handler.handle(task).await.expect("handled"));
        }
        outcomes
    }

    pub async fn depth(&self, queue: QueueName) -> usize {
        self.ctx.queue.depth(queue).await.expect("queue depth")
    }
}
