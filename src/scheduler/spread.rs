//! Publish-time assignment for a batch of generated posts
//!
//! Given one generated post per platform, [`SpreadScheduler::assign`]
//! returns one timestamp per post such that:
//!
//! - timestamps are non-decreasing and at least `min_spacing` apart
//! - each hour-of-day (in the user's zone) lies inside the posting window
//!   when the window is enabled
//! - smart-spread timestamps are strictly in the future
//!
//! # Smart spread
//!
//! Each platform's optimal hours are intersected with the window (falling
//! back to the window start, or noon without a window). Posts are spread
//! over days with `posts_per_day = min(|hours|, daily_limit)`; post `i`
//! lands on day `i / posts_per_day` at `hours[i % posts_per_day]` with a
//! random minute. A slot that is not after "now" rolls to the next day; a
//! slot closer than `min_spacing` to the previous post is pushed forward.

use chrono::{DateTime, Days, Duration, LocalResult, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use rand::Rng;

use crate::models::{Platform, PostingWindow, ScheduleMode, UserSettings};

/// Hour used when the window is disabled and no optimal hour survives
pub const DEFAULT_FALLBACK_HOUR: u32 = 12;

/// Spacing used by the immediate mode
pub const IMMEDIATE_SPACING_MINUTES: i64 = 2;

/// Publish-time planner for one user
#[derive(Debug, Clone)]
pub struct SpreadScheduler {
    mode: ScheduleMode,
    window: PostingWindow,
    min_spacing: Duration,
    daily_limit: i64,
    tz: Tz,
}

impl SpreadScheduler {
    pub fn new(mode: ScheduleMode, window: PostingWindow, min_spacing: Duration, tz: Tz) -> Self {
        Self {
            mode,
            window: window.sanitized(),
            min_spacing: min_spacing.max(Duration::zero()),
            daily_limit: 0,
            tz,
        }
    }

    /// Planner for a user's settings; out-of-range values are clamped
    pub fn from_settings(settings: &UserSettings) -> Self {
        let settings = settings.clone().sanitized();
        let spacing = Duration::try_minutes(settings.schedule_delay_minutes).unwrap_or_else(Duration::zero);
        Self::new(
            settings.schedule_mode,
            settings.posting_window,
            spacing,
            settings.tz(),
        )
        .with_daily_limit(settings.max_posts_per_day)
    }

    /// Posts per day cap for smart spread; `<= 0` means no cap
    pub fn with_daily_limit(mut self, daily_limit: i64) -> Self {
        self.daily_limit = daily_limit;
        self
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Optimal hours for a platform inside the window, never empty
    pub fn hours_for(&self, platform: Platform) -> Vec<u32> {
        let hours: Vec<u32> = platform
            .optimal_hours()
            .iter()
            .copied()
            .filter(|hour| self.window.contains(*hour))
            .collect();

        if !hours.is_empty() {
            hours
        } else if self.window.enabled {
            vec![self.window.start_hour]
        } else {
            vec![DEFAULT_FALLBACK_HOUR]
        }
    }

    /// Assign one timestamp per platform, in order
    pub fn assign(&self, platforms: &[Platform], now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut rng = rand::thread_rng();
        self.assign_with_rng(platforms, now, &mut rng)
    }

    pub fn assign_with_rng<R: Rng + ?Sized>(
        &self,
        platforms: &[Platform],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<DateTime<Utc>> {
        let base = self.fit_window(now);
        let mut assigned: Vec<DateTime<Utc>> = Vec::with_capacity(platforms.len());

        for (i, platform) in platforms.iter().enumerate() {
            let candidate = match self.mode {
                ScheduleMode::SmartSpread => self.smart_slot(*platform, i, base, now, rng),
                ScheduleMode::Immediate => {
                    now + Duration::minutes(IMMEDIATE_SPACING_MINUTES * i as i64)
                }
                ScheduleMode::Staggered => base + self.min_spacing * i as i32,
                ScheduleMode::Daily => self.daily_slot(i, base, now, rng),
                ScheduleMode::AutoSpread => self.auto_slot(i, platforms.len(), base),
            };

            let spacing = match self.mode {
                ScheduleMode::Immediate => Duration::minutes(IMMEDIATE_SPACING_MINUTES),
                _ => self.min_spacing,
            };
            let slot = self.settle(candidate, assigned.last().copied(), spacing);
            assigned.push(slot);
        }

        assigned
    }

    /// Start of the posting window on the next local day
    pub fn next_window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.tz).date_naive();
        let hour = if self.window.enabled {
            self.window.start_hour
        } else {
            0
        };
        self.at_local(today + Days::new(1), hour, 0)
    }

    // ========================================================================
    // Modes
    // ========================================================================

    fn smart_slot<R: Rng + ?Sized>(
        &self,
        platform: Platform,
        index: usize,
        base: DateTime<Utc>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> DateTime<Utc> {
        let hours = self.hours_for(platform);
        let per_day = match usize::try_from(self.daily_limit) {
            Ok(limit) if limit > 0 => hours.len().min(limit),
            _ => hours.len(),
        }
        .max(1);

        let day = (index / per_day) as u64;
        let slot = index % per_day;
        let hour = hours[slot % hours.len()];
        let minute = rng.gen_range(0..60);

        let date = base.with_timezone(&self.tz).date_naive() + Days::new(day);
        let slot_time = self.at_local(date, hour, minute);
        if slot_time > now {
            slot_time
        } else {
            self.at_local(date + Days::new(1), hour, minute)
        }
    }

    fn daily_slot<R: Rng + ?Sized>(
        &self,
        index: usize,
        base: DateTime<Utc>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> DateTime<Utc> {
        let hour = if self.window.enabled {
            self.window.start_hour
        } else {
            DEFAULT_FALLBACK_HOUR
        };
        let minute = rng.gen_range(0..60);
        let date = base.with_timezone(&self.tz).date_naive() + Days::new(index as u64);
        let slot_time = self.at_local(date, hour, minute);
        if slot_time > now {
            slot_time
        } else {
            self.at_local(date + Days::new(1), hour, minute)
        }
    }

    /// Even spacing over what is left of today's window
    fn auto_slot(&self, index: usize, count: usize, base: DateTime<Utc>) -> DateTime<Utc> {
        let local = base.with_timezone(&self.tz);
        let window_end = if self.window.enabled {
            self.at_local(local.date_naive(), self.window.end_hour, 59)
        } else {
            base + Duration::hours(24)
        };

        let remaining = (window_end - base).max(Duration::zero());
        let step = (remaining / count.max(1) as i32).max(self.min_spacing);
        base + step * index as i32
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Enforce spacing after `previous`, then move into the window
    fn settle(
        &self,
        candidate: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
        spacing: Duration,
    ) -> DateTime<Utc> {
        let mut slot = candidate;
        if let Some(previous) = previous {
            let earliest = previous + spacing;
            if slot < earliest {
                slot = earliest;
            }
        }
        self.fit_window(slot)
    }

    /// Move a time forward to the nearest point inside the window
    fn fit_window(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if !self.window.enabled {
            return at;
        }
        let local = at.with_timezone(&self.tz);
        let hour = local.hour();
        let date = local.date_naive();

        if hour < self.window.start_hour {
            self.at_local(date, self.window.start_hour, 0)
        } else if hour > self.window.end_hour {
            self.at_local(date + Days::new(1), self.window.start_hour, 0)
        } else {
            at
        }
    }

    /// Local wall time in the user's zone, as UTC
    fn at_local(&self, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
        let naive = date.and_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or_default();
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(at) => at.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // Inside a DST gap: the wall time does not exist, take the hour after
            LocalResult::None => {
                let shifted = naive + Duration::hours(1);
                self.tz
                    .from_local_datetime(&shifted)
                    .earliest()
                    .map(|at| at.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
            }
        }
    }
}
