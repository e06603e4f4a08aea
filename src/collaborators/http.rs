//! REST client for the system of record and collaborator services
//!
//! Every endpoint answers with the `{ success, data, error }` envelope.
//! Transient failures (connect errors, timeouts, 429, 5xx) are retried with
//! exponential backoff; 404 on a lookup means "absent".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::{
    CollabResult, CollaboratorError, ContentDiscovery, ContentGenerator, PlatformPublisher,
    SystemOfRecord,
};
use crate::config::ApiConfig;
use crate::models::{
    Account, DiscoveredContent, GeneratedPost, Monitor, Platform, Post, PostStatus,
    PublishOutcome, UserSettings,
};
use crate::utils::retry::{with_retry_if, BackoffConfig};

const SERVICE: &str = "api";

/// Generic API response envelope
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct StatusUpdate<'a> {
    status: PostStatus,
    details: &'a serde_json::Value,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct MonitorChecked {
    last_checked: DateTime<Utc>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    post: &'a Post,
    settings: &'a UserSettings,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    post: &'a GeneratedPost,
    account_id: &'a str,
    idempotency_key: &'a str,
}

/// HTTP implementation of every collaborator
pub struct ApiClient {
    http: Client,
    base: Url,
    token: Option<String>,
    backoff: BackoffConfig,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> CollabResult<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| CollaboratorError::rejected(SERVICE, format!("invalid base url: {e}")))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("recast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollaboratorError::unavailable(SERVICE, e.to_string()))?;

        Ok(Self {
            http,
            base,
            token: config.token.clone(),
            backoff: BackoffConfig::new(config.max_retries),
        })
    }

    /// Override retry delays (tests use millisecond delays)
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> CollabResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| CollaboratorError::rejected(SERVICE, format!("bad path {path}: {e}")))
    }

    /// One request with retry; `Ok(None)` on 404
    async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
        idempotency_key: Option<&str>,
    ) -> CollabResult<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        with_retry_if(
            &self.backoff,
            path,
            || {
                let mut request = self.http.request(method.clone(), url.clone()).query(query);
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }
                if let Some(key) = idempotency_key {
                    request = request.header("Idempotency-Key", key);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                async move { Self::read_envelope(request.send().await).await }
            },
            CollaboratorError::is_transient,
        )
        .await
    }

    async fn read_envelope<T: DeserializeOwned>(
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> CollabResult<Option<T>> {
        let response = sent.map_err(|e| CollaboratorError::unavailable(SERVICE, e.to_string()))?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::rejected(
                SERVICE,
                format!("HTTP {}: {body}", status.as_u16()),
            ));
        }

        let envelope: ApiResponse<T> =
            response
                .json()
                .await
                .map_err(|e| CollaboratorError::InvalidResponse {
                    service: SERVICE,
                    reason: e.to_string(),
                })?;

        if !envelope.success {
            return Err(CollaboratorError::rejected(
                SERVICE,
                envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(envelope.data)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CollabResult<Option<T>> {
        self.request::<(), T>(Method::GET, path, query, None, None)
            .await
    }

    /// GET of a list; absent means empty
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CollabResult<Vec<T>> {
        Ok(self.get(path, query).await?.unwrap_or_default())
    }

    async fn send<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> CollabResult<Option<T>> {
        self.request(method, path, &[], Some(body), None).await
    }
}

#[async_trait]
impl ContentDiscovery for ApiClient {
    async fn scan_monitor(&self, monitor: &Monitor) -> CollabResult<Vec<DiscoveredContent>> {
        let path = format!("monitors/{}/scan", monitor.id);
        Ok(self
            .send(Method::POST, &path, &serde_json::json!({}))
            .await?
            .unwrap_or_default())
    }

    async fn scan_all_monitors(
        &self,
        user_id: &str,
    ) -> CollabResult<HashMap<String, Vec<DiscoveredContent>>> {
        let path = format!("users/{user_id}/scan");
        Ok(self
            .send(Method::POST, &path, &serde_json::json!({}))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl ContentGenerator for ApiClient {
    async fn generate(
        &self,
        post: &Post,
        settings: &UserSettings,
    ) -> CollabResult<Vec<GeneratedPost>> {
        let body = GenerateRequest { post, settings };
        Ok(self
            .send(Method::POST, "content/generate", &body)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl PlatformPublisher for ApiClient {
    async fn publish(
        &self,
        post: &GeneratedPost,
        account: &Account,
        idempotency_key: &str,
    ) -> CollabResult<PublishOutcome> {
        let body = PublishRequest {
            post,
            account_id: &account.id,
            idempotency_key,
        };
        let outcome: Option<PublishOutcome> = self
            .request(
                Method::POST,
                &format!("publish/{}", post.platform),
                &[],
                Some(&body),
                Some(idempotency_key),
            )
            .await?;

        outcome.ok_or_else(|| CollaboratorError::InvalidResponse {
            service: SERVICE,
            reason: "publish endpoint returned no outcome".to_string(),
        })
    }
}

#[async_trait]
impl SystemOfRecord for ApiClient {
    async fn get_monitor(&self, monitor_id: &str) -> CollabResult<Option<Monitor>> {
        self.get(&format!("monitors/{monitor_id}"), &[]).await
    }

    async fn active_monitors(&self, user_id: &str) -> CollabResult<Vec<Monitor>> {
        self.get_list(
            &format!("users/{user_id}/monitors"),
            &[("active", "true".to_string())],
        )
        .await
    }

    async fn users_with_active_monitors(&self) -> CollabResult<Vec<String>> {
        self.get_list("monitors/active-users", &[]).await
    }

    async fn mark_monitor_checked(&self, monitor_id: &str, at: DateTime<Utc>) -> CollabResult<()> {
        let _: Option<serde_json::Value> = self
            .send(
                Method::PATCH,
                &format!("monitors/{monitor_id}"),
                &MonitorChecked { last_checked: at },
            )
            .await?;
        Ok(())
    }

    async fn posts_with_status(
        &self,
        user_id: &str,
        status: PostStatus,
        limit: usize,
    ) -> CollabResult<Vec<Post>> {
        self.get_list(
            &format!("users/{user_id}/posts"),
            &[
                ("status", status.as_str().to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn get_post(&self, post_id: &str) -> CollabResult<Option<Post>> {
        self.get(&format!("posts/{post_id}"), &[]).await
    }

    async fn update_post_status(
        &self,
        post_id: &str,
        status: PostStatus,
        details: serde_json::Value,
    ) -> CollabResult<()> {
        let body = StatusUpdate {
            status,
            details: &details,
            updated_at: Utc::now(),
        };
        let _: Option<serde_json::Value> = self
            .send(Method::PATCH, &format!("posts/{post_id}/status"), &body)
            .await?;
        Ok(())
    }

    async fn user_settings(&self, user_id: &str) -> CollabResult<Option<UserSettings>> {
        self.get(&format!("users/{user_id}/settings"), &[]).await
    }

    async fn connected_accounts(
        &self,
        user_id: &str,
        platform: Option<Platform>,
    ) -> CollabResult<Vec<Account>> {
        let query: Vec<(&str, String)> = platform
            .map(|p| vec![("platform", p.as_str().to_string())])
            .unwrap_or_default();
        self.get_list(&format!("users/{user_id}/accounts"), &query)
            .await
    }
}
