// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Provider Client Port
//!
//! Every call to the external code-hosting API goes through this port. The
//! infrastructure implementation handles authentication, rate-limit
//! bookkeeping, conditional requests, and retries; stages see only typed
//! records and the domain error vocabulary:
//!
//! - `NotFound` - the entity does not exist (or is not visible); never
//!   retried
//! - `RateLimited { reset_at }` - the hourly quota is exhausted; the stage
//!   decides between waiting and winding down
//! - `ProviderTransient` - retries inside the client were exhausted
//!
//! The client never touches the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Minimal user reference embedded in other records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUserSummary {
    pub provider_id: i64,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

/// Full user detail from the user endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub provider_id: i64,
    pub login: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub twitter: Option<String>,
    pub location: Option<String>,
    pub followers: i64,
    pub public_repos: i64,
    pub is_bot: bool,
}

/// Full repository detail from the repository endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRepository {
    pub provider_id: i64,
    pub full_name: String,
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub size_kb: i64,
    pub primary_language: Option<String>,
    pub default_branch: Option<String>,
    pub is_fork: bool,
    pub is_archived: bool,
    pub owner: Option<ProviderUserSummary>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Pull request detail, from events or the pull request endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPullRequest {
    /// PR number within the repository
    pub number: i64,
    /// The provider's internal PR id (globally unique, unlike the number)
    pub internal_id: Option<i64>,
    pub title: String,
    pub body: Option<String>,
    pub state: Option<String>,
    pub is_draft: bool,
    pub author: Option<ProviderUserSummary>,
    pub merged_by: Option<ProviderUserSummary>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub commits: i64,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub review_count: i64,
    pub comment_count: i64,
    pub head_ref: Option<String>,
    pub base_ref: Option<String>,
    pub labels: Vec<String>,
}

/// Repository facet carried by a public activity event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEventRepository {
    pub provider_id: i64,
    pub full_name: String,
    pub url: Option<String>,
}

/// One merged-pull-request event from the provider's public event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPullRequestEvent {
    pub repository: Option<ProviderEventRepository>,
    pub pull_request: ProviderPullRequest,
}

impl ProviderPullRequestEvent {
    /// The key the Sync stage stages this event under: the globally unique
    /// internal id when the provider sent one, the PR number otherwise.
    pub fn staging_key(&self) -> i64 {
        match self.pull_request.internal_id {
            Some(id) if id > 0 => id,
            _ => self.pull_request.number,
        }
    }
}

/// Commit detail from the PR commit list or the commit endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCommit {
    pub sha: String,
    pub message: String,
    pub author: Option<ProviderUserSummary>,
    pub committed_at: Option<DateTime<Utc>>,
    pub additions: i64,
    pub deletions: i64,
    pub files_changed: i64,
    pub parent_shas: Vec<String>,
}

// Provider records convert into canonical payload facets when the Sync
// stage assembles a staged payload.

impl From<ProviderUserSummary> for crate::value_objects::activity_payload::UserFacet {
    fn from(user: ProviderUserSummary) -> Self {
        Self {
            provider_id: user.provider_id,
            login: user.login,
            avatar_url: user.avatar_url,
            is_bot: user.is_bot,
        }
    }
}

impl From<ProviderPullRequest> for crate::value_objects::activity_payload::PullRequestFacet {
    fn from(pr: ProviderPullRequest) -> Self {
        Self {
            number: pr.number,
            internal_id: pr.internal_id,
            title: pr.title,
            body: pr.body,
            state: pr.state,
            is_draft: pr.is_draft,
            author: pr.author.map(Into::into),
            merged_by: pr.merged_by.map(Into::into),
            created_at: pr.created_at,
            updated_at: pr.updated_at,
            closed_at: pr.closed_at,
            merged_at: pr.merged_at,
            commits: pr.commits,
            additions: pr.additions,
            deletions: pr.deletions,
            changed_files: pr.changed_files,
            review_count: pr.review_count,
            comment_count: pr.comment_count,
            head_ref: pr.head_ref,
            base_ref: pr.base_ref,
            labels: pr.labels,
        }
    }
}

impl From<ProviderCommit> for crate::value_objects::activity_payload::CommitFacet {
    fn from(commit: ProviderCommit) -> Self {
        Self {
            sha: commit.sha,
            message: commit.message,
            author: commit.author.map(Into::into),
            committed_at: commit.committed_at,
            additions: commit.additions,
            deletions: commit.deletions,
            files_changed: commit.files_changed,
            parent_shas: commit.parent_shas,
        }
    }
}

impl From<ProviderEventRepository> for crate::value_objects::activity_payload::RepositoryFacet {
    fn from(repo: ProviderEventRepository) -> Self {
        Self {
            provider_id: repo.provider_id,
            full_name: repo.full_name,
            url: repo.url,
            ..Default::default()
        }
    }
}

/// Last-seen rate-limit accounting, updated after every response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Typed access to the external code-hosting API.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetches full repository detail by `owner`/`name`.
    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<ProviderRepository, PipelineError>;

    /// Fetches full user detail by provider id. Preferred over login-based
    /// lookup because logins can be renamed.
    async fn get_user(&self, provider_id: i64) -> Result<ProviderUser, PipelineError>;

    /// Fetches pull request detail by repository and number.
    async fn get_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<ProviderPullRequest, PipelineError>;

    /// Fetches one commit by repository and SHA.
    async fn get_commit(
        &self,
        owner: &str,
        name: &str,
        sha: &str,
    ) -> Result<ProviderCommit, PipelineError>;

    /// Lists the provider's latest public events filtered to merged pull
    /// requests.
    async fn list_recent_merged_pull_request_events(
        &self,
    ) -> Result<Vec<ProviderPullRequestEvent>, PipelineError>;

    /// Lists the commits belonging to one pull request.
    async fn list_pull_request_commits(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<Vec<ProviderCommit>, PipelineError>;

    /// The most recent rate-limit accounting observed on any response.
    fn rate_limit(&self) -> RateLimitSnapshot;
}
