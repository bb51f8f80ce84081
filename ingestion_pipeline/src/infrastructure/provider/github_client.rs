// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # GitHub Provider Client
//!
//! The reqwest-backed implementation of the provider port. Every request
//! goes through one pipeline:
//!
//! 1. **Rate gate** - if the last response reported remaining quota below
//!    the low-water mark, either sleep until the reported reset (when
//!    `wait_on_rate_limit` is set) or fail with `RateLimited { reset_at }`.
//! 2. **Conditional request** - a stored ETag for the endpoint is sent as
//!    `If-None-Match`; a 304 answers from the cached body without spending
//!    freshness.
//! 3. **Send + retry** - connection errors, 5xx, and 429s that are not
//!    quota exhaustion retry with exponential backoff and full jitter, up
//!    to a fixed cap. 404 maps to `NotFound` and is never retried; other
//!    4xx fail fast.
//! 4. **Ledger update** - `x-ratelimit-*` headers from every response are
//!    recorded in the shared snapshot.
//!
//! All sleeps race the cancellation token, so shutdown interrupts a
//! rate-limit wait immediately. The client never touches the store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, IF_NONE_MATCH, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use ingestion_pipeline_bootstrap::shutdown::CancellationToken;
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::services::provider_client::{
    ProviderClient, ProviderCommit, ProviderEventRepository, ProviderPullRequest,
    ProviderPullRequestEvent, ProviderRepository, ProviderUser, ProviderUserSummary,
    RateLimitSnapshot,
};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const CLIENT_USER_AGENT: &str = "ingestion-pipeline/1.0";
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client construction parameters.
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Remaining-quota threshold below which the gate engages
    pub rate_limit_low_water: i64,
    /// Gate policy: sleep until reset instead of failing
    pub wait_on_rate_limit: bool,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        GitHubClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            rate_limit_low_water: 100,
            wait_on_rate_limit: false,
        }
    }
}

struct CachedResponse {
    etag: String,
    body: String,
}

/// Reqwest-backed provider client with shared rate-limit state.
pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubClientConfig,
    cancel: CancellationToken,
    rate_limit: Mutex<RateLimitSnapshot>,
    etag_cache: Mutex<HashMap<String, CachedResponse>>,
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig, cancel: CancellationToken) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| PipelineError::invalid_config("PROVIDER_TOKEN contains invalid header characters"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::internal_error(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            cancel,
            rate_limit: Mutex::new(RateLimitSnapshot::default()),
            etag_cache: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn sleep_cancellable(&self, duration: Duration) -> Result<(), PipelineError> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(PipelineError::cancelled("provider wait interrupted by shutdown"))
            }
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Enforces the low-water policy before a request is sent.
    async fn rate_gate(&self) -> Result<(), PipelineError> {
        loop {
            let snapshot = *self.rate_limit.lock();
            let (Some(remaining), Some(reset_at)) = (snapshot.remaining, snapshot.reset_at) else {
                return Ok(());
            };
            if remaining >= self.config.rate_limit_low_water {
                return Ok(());
            }
            if reset_at <= Utc::now() {
                // The window has rolled over; optimistically proceed and let
                // the next response refresh the ledger.
                return Ok(());
            }
            if !self.config.wait_on_rate_limit {
                return Err(PipelineError::rate_limited(reset_at));
            }
            let wait = (reset_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            debug!(?wait, "rate limit low water reached, sleeping until reset");
            self.sleep_cancellable(wait + Duration::from_secs(1)).await?;
        }
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
        };
        let mut snapshot = self.rate_limit.lock();
        if let Some(limit) = read("x-ratelimit-limit") {
            snapshot.limit = Some(limit);
        }
        if let Some(remaining) = read("x-ratelimit-remaining") {
            snapshot.remaining = Some(remaining);
        }
        if let Some(reset) = read("x-ratelimit-reset") {
            snapshot.reset_at = Utc.timestamp_opt(reset, 0).single();
        }
    }

    /// Whether a 403/429 is quota exhaustion rather than a transient fault.
    fn quota_exhausted(&self, headers: &HeaderMap) -> Option<DateTime<Utc>> {
        let remaining = headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())?;
        if remaining > 0 {
            return None;
        }
        headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|reset| Utc.timestamp_opt(reset, 0).single())
    }

    /// One GET with the full gate / conditional / retry pipeline.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        let mut attempt = 0u32;
        loop {
            self.rate_gate().await?;
            if self.cancel.is_cancelled() {
                return Err(PipelineError::cancelled("provider request interrupted"));
            }

            let mut request = self.http.get(self.url(path));
            let cached_etag = self
                .etag_cache
                .lock()
                .get(path)
                .map(|cached| cached.etag.clone());
            if let Some(etag) = &cached_etag {
                request = request.header(IF_NONE_MATCH, etag.as_str());
            }

            let outcome = request.send().await;
            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(PipelineError::provider_transient(format!(
                            "request to {} failed after {} retries: {}",
                            path, attempt, e
                        )));
                    }
                    attempt += 1;
                    self.backoff(attempt).await?;
                    continue;
                }
            };

            self.record_rate_limit(response.headers());
            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                let cached = self
                    .etag_cache
                    .lock()
                    .get(path)
                    .map(|cached| cached.body.clone());
                if let Some(body) = cached {
                    debug!(path, "conditional hit, serving cached body");
                    return serde_json::from_str(&body).map_err(PipelineError::from);
                }
                // Cache entry vanished between the request and the answer;
                // retry unconditionally.
                self.etag_cache.lock().remove(path);
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(PipelineError::not_found(format!("provider resource {}", path)));
            }

            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(reset_at) = self.quota_exhausted(response.headers()) {
                    return Err(PipelineError::rate_limited(reset_at));
                }
                if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                    attempt += 1;
                    self.backoff(attempt).await?;
                    continue;
                }
                return Err(PipelineError::provider_transient(format!(
                    "provider answered {} for {}",
                    status, path
                )));
            }

            if status.is_server_error() {
                if attempt >= MAX_RETRIES {
                    return Err(PipelineError::provider_transient(format!(
                        "provider answered {} for {} after {} retries",
                        status, path, attempt
                    )));
                }
                attempt += 1;
                self.backoff(attempt).await?;
                continue;
            }

            if status.is_client_error() {
                return Err(PipelineError::validation_error(format!(
                    "provider rejected request to {}: {}",
                    path, status
                )));
            }

            let etag = response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.map_err(|e| {
                PipelineError::provider_transient(format!("failed to read response body: {}", e))
            })?;

            if let Some(etag) = etag {
                self.etag_cache
                    .lock()
                    .insert(path.to_string(), CachedResponse { etag, body: body.clone() });
            }

            return serde_json::from_str(&body).map_err(PipelineError::from);
        }
    }

    /// Exponential backoff with full jitter, interruptible.
    async fn backoff(&self, attempt: u32) -> Result<(), PipelineError> {
        let ceiling = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(6));
        let jittered = rand::rng().random_range(0..=ceiling);
        warn!(attempt, delay_ms = jittered, "retrying provider request");
        self.sleep_cancellable(Duration::from_millis(jittered)).await
    }
}

// ----- wire format ------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct WireUser {
    id: i64,
    login: Option<String>,
    avatar_url: Option<String>,
    #[serde(rename = "type")]
    account_type: Option<String>,
    name: Option<String>,
    bio: Option<String>,
    company: Option<String>,
    blog: Option<String>,
    twitter_username: Option<String>,
    location: Option<String>,
    #[serde(default)]
    followers: i64,
    #[serde(default)]
    public_repos: i64,
}

impl WireUser {
    fn is_bot(&self) -> bool {
        self.account_type.as_deref() == Some("Bot")
    }

    fn into_summary(self) -> ProviderUserSummary {
        let is_bot = self.is_bot();
        ProviderUserSummary {
            provider_id: self.id,
            login: self.login,
            avatar_url: self.avatar_url,
            is_bot,
        }
    }

    fn into_user(self) -> ProviderUser {
        let is_bot = self.is_bot();
        ProviderUser {
            provider_id: self.id,
            login: self.login,
            name: self.name,
            avatar_url: self.avatar_url,
            bio: self.bio,
            company: self.company,
            blog: self.blog,
            twitter: self.twitter_username,
            location: self.location,
            followers: self.followers,
            public_repos: self.public_repos,
            is_bot,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRepository {
    id: i64,
    full_name: String,
    name: String,
    html_url: Option<String>,
    description: Option<String>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    forks_count: i64,
    #[serde(default)]
    watchers_count: i64,
    #[serde(default)]
    open_issues_count: i64,
    #[serde(default)]
    size: i64,
    language: Option<String>,
    default_branch: Option<String>,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    archived: bool,
    owner: Option<WireUser>,
    pushed_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
}

impl WireRepository {
    fn into_repository(self) -> ProviderRepository {
        ProviderRepository {
            provider_id: self.id,
            full_name: self.full_name,
            name: self.name,
            url: self.html_url,
            description: self.description,
            stars: self.stargazers_count,
            forks: self.forks_count,
            watchers: self.watchers_count,
            open_issues: self.open_issues_count,
            size_kb: self.size,
            primary_language: self.language,
            default_branch: self.default_branch,
            is_fork: self.fork,
            is_archived: self.archived,
            owner: self.owner.map(WireUser::into_summary),
            pushed_at: self.pushed_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireBranchRef {
    #[serde(rename = "ref")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WirePullRequest {
    number: i64,
    id: Option<i64>,
    title: Option<String>,
    body: Option<String>,
    state: Option<String>,
    #[serde(default)]
    draft: bool,
    user: Option<WireUser>,
    merged_by: Option<WireUser>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    commits: i64,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
    #[serde(default)]
    changed_files: i64,
    #[serde(default)]
    review_comments: i64,
    #[serde(default)]
    comments: i64,
    head: Option<WireBranchRef>,
    base: Option<WireBranchRef>,
    #[serde(default)]
    labels: Vec<WireLabel>,
}

impl WirePullRequest {
    fn into_pull_request(self) -> ProviderPullRequest {
        ProviderPullRequest {
            number: self.number,
            internal_id: self.id,
            title: self.title.unwrap_or_default(),
            body: self.body,
            state: self.state,
            is_draft: self.draft,
            author: self.user.map(WireUser::into_summary),
            merged_by: self.merged_by.map(WireUser::into_summary),
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
            merged_at: self.merged_at,
            commits: self.commits,
            additions: self.additions,
            deletions: self.deletions,
            changed_files: self.changed_files,
            review_count: self.review_comments,
            comment_count: self.comments,
            head_ref: self.head.and_then(|r| r.name),
            base_ref: self.base.and_then(|r| r.name),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEventRepository {
    id: i64,
    /// `owner/name` in the event feed
    name: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEventPayload {
    action: Option<String>,
    pull_request: Option<WirePullRequest>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    repo: Option<WireEventRepository>,
    payload: Option<WireEventPayload>,
}

#[derive(Debug, Deserialize)]
struct WireCommitPerson {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WireCommitDetail {
    #[serde(default)]
    message: String,
    author: Option<WireCommitPerson>,
}

#[derive(Debug, Deserialize)]
struct WireCommitParent {
    sha: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireCommitStats {
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
}

#[derive(Debug, Deserialize)]
struct WireCommitFile {}

#[derive(Debug, Deserialize)]
struct WireCommit {
    sha: String,
    commit: WireCommitDetail,
    author: Option<WireUser>,
    #[serde(default)]
    parents: Vec<WireCommitParent>,
    stats: Option<WireCommitStats>,
    files: Option<Vec<WireCommitFile>>,
}

impl WireCommit {
    fn into_commit(self) -> ProviderCommit {
        let stats = self.stats.unwrap_or_default();
        let files_changed = self.files.as_ref().map(|f| f.len() as i64).unwrap_or(0);
        ProviderCommit {
            sha: self.sha,
            message: self.commit.message,
            author: self.author.map(WireUser::into_summary),
            committed_at: self.commit.author.and_then(|a| a.date),
            additions: stats.additions,
            deletions: stats.deletions,
            files_changed,
            parent_shas: self.parents.into_iter().map(|p| p.sha).collect(),
        }
    }
}

/// Filters an event page down to merged pull requests, the only activity
/// this pipeline follows.
fn merged_pull_request_events(events: Vec<WireEvent>) -> Vec<ProviderPullRequestEvent> {
    events
        .into_iter()
        .filter(|event| event.kind == "PullRequestEvent")
        .filter_map(|event| {
            let payload = event.payload?;
            if payload.action.as_deref() != Some("closed") {
                return None;
            }
            let pull_request = payload.pull_request?;
            if !(pull_request.merged || pull_request.merged_at.is_some()) {
                return None;
            }
            let repository = event.repo.map(|repo| ProviderEventRepository {
                provider_id: repo.id,
                full_name: repo.name,
                url: repo.url,
            });
            Some(ProviderPullRequestEvent {
                repository,
                pull_request: pull_request.into_pull_request(),
            })
        })
        .collect()
}

#[async_trait]
impl ProviderClient for GitHubClient {
    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<ProviderRepository, PipelineError> {
        if owner.is_empty() || name.is_empty() {
            return Err(PipelineError::validation_error(
                "repository owner and name must be non-empty",
            ));
        }
        let wire: WireRepository = self.get_json(&format!("/repos/{}/{}", owner, name)).await?;
        Ok(wire.into_repository())
    }

    async fn get_user(&self, provider_id: i64) -> Result<ProviderUser, PipelineError> {
        if provider_id <= 0 {
            return Err(PipelineError::validation_error(format!(
                "user provider id must be positive, got {}",
                provider_id
            )));
        }
        let wire: WireUser = self.get_json(&format!("/user/{}", provider_id)).await?;
        Ok(wire.into_user())
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<ProviderPullRequest, PipelineError> {
        if owner.is_empty() || name.is_empty() || number <= 0 {
            return Err(PipelineError::validation_error(
                "pull request lookup requires owner, name, and a positive number",
            ));
        }
        let wire: WirePullRequest = self
            .get_json(&format!("/repos/{}/{}/pulls/{}", owner, name, number))
            .await?;
        Ok(wire.into_pull_request())
    }

    async fn get_commit(
        &self,
        owner: &str,
        name: &str,
        sha: &str,
    ) -> Result<ProviderCommit, PipelineError> {
        if owner.is_empty() || name.is_empty() || sha.is_empty() {
            return Err(PipelineError::validation_error(
                "commit lookup requires owner, name, and a sha",
            ));
        }
        let wire: WireCommit = self
            .get_json(&format!("/repos/{}/{}/commits/{}", owner, name, sha))
            .await?;
        Ok(wire.into_commit())
    }

    async fn list_recent_merged_pull_request_events(
        &self,
    ) -> Result<Vec<ProviderPullRequestEvent>, PipelineError> {
        let events: Vec<WireEvent> = self.get_json("/events?per_page=100").await?;
        Ok(merged_pull_request_events(events))
    }

    async fn list_pull_request_commits(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<Vec<ProviderCommit>, PipelineError> {
        if owner.is_empty() || name.is_empty() || number <= 0 {
            return Err(PipelineError::validation_error(
                "pull request commits lookup requires owner, name, and a positive number",
            ));
        }
        let wire: Vec<WireCommit> = self
            .get_json(&format!("/repos/{}/{}/pulls/{}/commits", owner, name, number))
            .await?;
        Ok(wire.into_iter().map(WireCommit::into_commit).collect())
    }

    fn rate_limit(&self) -> RateLimitSnapshot {
        *self.rate_limit.lock()
    }
}
