// Core data structures moving through the pipeline

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-addressed fingerprint of canonical source text or URL
pub fn fingerprint(source: &str) -> String {
    let canonical = source.trim().trim_end_matches('/');
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Platforms
// ============================================================================

/// Social platform a generated post is published to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Linkedin,
    Facebook,
    Instagram,
    Youtube,
    Tiktok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Linkedin => "linkedin",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
        }
    }

    /// Parse a platform name ("x" is accepted for Twitter)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "twitter" | "x" => Some(Self::Twitter),
            "linkedin" => Some(Self::Linkedin),
            "facebook" => Some(Self::Facebook),
            "instagram" => Some(Self::Instagram),
            "youtube" => Some(Self::Youtube),
            "tiktok" => Some(Self::Tiktok),
            _ => None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::Twitter,
            Self::Linkedin,
            Self::Facebook,
            Self::Instagram,
            Self::Youtube,
            Self::Tiktok,
        ]
    }

    /// Hours of day (0-23) with the best engagement, in preference order
    pub fn optimal_hours(&self) -> &'static [u32] {
        match self {
            Self::Linkedin => &[9, 12, 17],
            Self::Twitter => &[12, 15, 18],
            Self::Facebook => &[13, 15, 20],
            Self::Instagram => &[11, 14, 17],
            Self::Youtube => &[14, 16, 20],
            Self::Tiktok => &[15, 18, 21],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Post lifecycle
// ============================================================================

/// Status of a post in the pipeline
///
/// ```text
/// discovered → processing → generating → generated → (scheduled) → published
///                   │            │            │            │
///                   └────────────┴────────────┴────────────┴──→ failed | skipped
///                   └────────────┴──→ generation_failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Discovered,
    Processing,
    Generating,
    Generated,
    Scheduled,
    Published,
    Failed,
    Skipped,
    GenerationFailed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Processing => "processing",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Scheduled => "scheduled",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::GenerationFailed => "generation_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Skipped)
    }

    /// Statuses meaning a generation task is already in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Processing | Self::Generating)
    }

    /// One step forward, or to a failure state
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Discovered, Processing)
                | (Processing, Generating)
                | (Generating, Generated)
                | (Generated, Scheduled)
                | (Generated, Published)
                | (Scheduled, Published)
                | (Processing | Generating, GenerationFailed)
                | (Processing | Generating | Generated | Scheduled, Failed | Skipped)
        )
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit moving through the pipeline
///
/// The id belongs to the system of record; the core only carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub monitor_id: String,
    pub user_id: String,
    #[serde(default)]
    pub content_fingerprint: String,
    pub status: PostStatus,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A watched source (feed or profile URL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    pub user_id: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Content found by a discovery scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredContent {
    /// Record id, when the discovery service already persisted the post
    #[serde(default)]
    pub post_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Source platform ("blog", "linkedin", ...)
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub content_fingerprint: String,
}

impl DiscoveredContent {
    /// The provided fingerprint, or one derived from the URL (body as fallback)
    pub fn fingerprint(&self) -> String {
        if !self.content_fingerprint.is_empty() {
            self.content_fingerprint.clone()
        } else if !self.url.trim().is_empty() {
            fingerprint(&self.url)
        } else {
            fingerprint(&self.body)
        }
    }

    /// In-flight post for this content
    pub fn to_post(&self, monitor: &Monitor) -> Post {
        let fingerprint = self.fingerprint();
        let short: String = fingerprint.chars().take(16).collect();
        Post {
            id: self
                .post_id
                .clone()
                .unwrap_or_else(|| format!("{}:{short}", monitor.id)),
            monitor_id: monitor.id.clone(),
            user_id: monitor.user_id.clone(),
            content_fingerprint: fingerprint,
            status: PostStatus::Discovered,
            platform: None,
            title: self.title.clone(),
            body: self.body.clone(),
            url: self.url.clone(),
            scheduled_time: None,
            created_at: Some(Utc::now()),
            updated_at: None,
        }
    }
}

/// Platform-specific rewrite produced by the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPost {
    /// Record id of the generated post, when the generator persisted it
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub source_post_id: Option<String>,
    pub user_id: String,
    pub platform: Platform,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl GeneratedPost {
    /// Id whose status the publish stage updates
    pub fn record_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.source_post_id.as_deref())
    }

    /// Stable key so a re-delivered publish is recognizable downstream
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_post_id.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.platform.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Connected platform account; credentials are opaque to the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub platform: Platform,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub credentials: serde_json::Value,
}

/// Result of one publish call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    #[serde(default)]
    pub platform_post_id: Option<String>,
    #[serde(default)]
    pub platform_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// User settings
// ============================================================================

/// How a batch of generated posts is spread over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    SmartSpread,
    Immediate,
    Staggered,
    Daily,
    AutoSpread,
}

/// Hour-of-day range in which publishing is allowed (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingWindow {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for PostingWindow {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: 8,
            end_hour: 22,
        }
    }
}

impl PostingWindow {
    /// Window with hours clamped to 0-23; an inverted range disables it
    pub fn sanitized(&self) -> Self {
        let start_hour = self.start_hour.min(23);
        let end_hour = self.end_hour.min(23);
        Self {
            enabled: self.enabled && start_hour <= end_hour,
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        !self.enabled || (self.start_hour..=self.end_hour).contains(&hour)
    }
}

/// Largest spacing between consecutive posts honoured (one week)
pub const MAX_SCHEDULE_DELAY_MINUTES: i64 = 7 * 24 * 60;

/// Longest interval between recurring scans honoured (30 days)
pub const MAX_CHECK_INTERVAL_MINUTES: i64 = 30 * 24 * 60;

/// Highest finite daily publish limit
pub const MAX_POSTS_PER_DAY: i64 = 1_000;

/// Per-user pipeline settings, mirrored from the system of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub user_id: String,
    pub content_generation_enabled: bool,
    pub auto_publish: bool,
    /// Daily publish limit; `<= 0` means unlimited
    pub max_posts_per_day: i64,
    pub enabled_platforms: Vec<Platform>,
    pub posting_window: PostingWindow,
    /// IANA zone name
    pub timezone: String,
    pub schedule_mode: ScheduleMode,
    /// Minimum spacing between consecutive posts
    pub schedule_delay_minutes: i64,
    /// Interval between recurring discovery sweeps
    pub check_interval_minutes: i64,
    /// Passed through to the generator untouched (tone, hashtags, ...)
    pub generation_options: serde_json::Value,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            content_generation_enabled: true,
            auto_publish: true,
            max_posts_per_day: 3,
            enabled_platforms: Vec::new(),
            posting_window: PostingWindow::default(),
            timezone: "UTC".to_string(),
            schedule_mode: ScheduleMode::SmartSpread,
            schedule_delay_minutes: 30,
            check_interval_minutes: 60,
            generation_options: serde_json::Value::Null,
        }
    }
}

impl UserSettings {
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    /// Numeric fields pulled into workable ranges
    ///
    /// A negative daily limit becomes 0, which keeps its "unlimited" meaning.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let raw = (
            self.schedule_delay_minutes,
            self.check_interval_minutes,
            self.max_posts_per_day,
        );
        self.schedule_delay_minutes = self
            .schedule_delay_minutes
            .clamp(0, MAX_SCHEDULE_DELAY_MINUTES);
        self.check_interval_minutes = self
            .check_interval_minutes
            .clamp(1, MAX_CHECK_INTERVAL_MINUTES);
        self.max_posts_per_day = self.max_posts_per_day.clamp(0, MAX_POSTS_PER_DAY);

        let clamped = (
            self.schedule_delay_minutes,
            self.check_interval_minutes,
            self.max_posts_per_day,
        );
        if raw != clamped {
            tracing::warn!(
                user_id = %self.user_id,
                schedule_delay_minutes = raw.0,
                check_interval_minutes = raw.1,
                max_posts_per_day = raw.2,
                "User settings out of range, clamped"
            );
        }
        self
    }

    pub fn platform_enabled(&self, platform: Platform) -> bool {
        self.enabled_platforms.contains(&platform)
    }

    /// Parsed timezone, UTC when the name is unknown
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(user_id = %self.user_id, timezone = %self.timezone, "Unknown timezone, using UTC");
            Tz::UTC
        })
    }
}

// ============================================================================
// Activity log
// ============================================================================

/// Kind of an operator-visible activity record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    MonitorChecked,
    ContentDiscovered,
    DiscoverySkipped,
    ContentGenerated,
    ContentGenerationFailed,
    PostScheduled,
    PostPublished,
    PublishingSkipped,
    PublishingDeferred,
    PublishingError,
    WorkerError,
}

/// Entry in the activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub kind: ActivityKind,
    #[serde(default)]
    pub user_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(kind: ActivityKind, user_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            user_id: user_id.map(str::to_string),
            message: message.into(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
