//! In-process system of record for unit tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::collaborators::{CollabResult, CollaboratorError, SystemOfRecord};
use crate::models::{Account, Monitor, Platform, Post, PostStatus, UserSettings};

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
    settings_down: AtomicBool,
    posts_down: AtomicBool,
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

    pub fn fail_settings(&self, down: bool) {
        self.settings_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_posts(&self, down: bool) {
        self.posts_down.store(down, Ordering::SeqCst);
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

    pub async fn updates(&self) -> Vec<(String, PostStatus)> {
        self.inner.lock().await.updates.clone()
    }
}

fn down() -> CollaboratorError {
    CollaboratorError::unavailable("records", "injected outage")
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
        if self.posts_down.load(Ordering::SeqCst) {
            return Err(down());
        }
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
        if self.settings_down.load(Ordering::SeqCst) {
            return Err(down());
        }
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

/// A post owned by `user_id` in the given status
pub fn post(id: &str, user_id: &str, status: PostStatus) -> Post {
    Post {
        id: id.to_string(),
        monitor_id: "m1".to_string(),
        user_id: user_id.to_string(),
        content_fingerprint: crate::models::fingerprint(id),
        status,
        platform: None,
        title: format!("Post {id}"),
        body: String::new(),
        url: format!("https://blog.example.com/{id}"),
        scheduled_time: None,
        created_at: None,
        updated_at: None,
    }
}
