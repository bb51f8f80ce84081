// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Canonical Activity Payload
//!
//! The staging contract between the Sync and Process stages. Sync assembles
//! one `ActivityPayload` per merged pull request (repository facet, pull
//! request facet, commit list) and stores it as opaque JSON in the raw table;
//! Process decodes it back and extracts entities.
//!
//! The format is deliberately tolerant on the read side: every facet and
//! almost every field is optional or defaulted, because the provider omits
//! data freely and a malformed payload must become a tracked per-item
//! failure, never a stage crash. Validation of what is actually required
//! (repository facet, pull request facet, a usable PR number) happens in the
//! Process stage, not in serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Login spellings the legacy importer used for unknown users. Rows carrying
/// them are placeholders, never enrichment candidates.
const SENTINEL_LOGINS: [&str; 2] = ["unknown", "placeholder"];

/// A user reference inside a payload facet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserFacet {
    /// Provider id; 0 means the provider did not resolve the user
    #[serde(default)]
    pub provider_id: i64,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Provider account type, `true` for bot accounts
    #[serde(default)]
    pub is_bot: bool,
}

impl UserFacet {
    /// Whether this facet can be resolved to a contributor row at all
    pub fn is_resolvable(&self) -> bool {
        self.provider_id > 0
    }

    /// Whether the login is one of the legacy sentinel spellings
    pub fn has_sentinel_login(&self) -> bool {
        match self.login.as_deref() {
            Some(login) => {
                SENTINEL_LOGINS.contains(&login) || login.starts_with("placeholder-")
            }
            None => false,
        }
    }
}

/// Repository information captured from the activity event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryFacet {
    pub provider_id: i64,
    /// `owner/name`
    pub full_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stars: i64,
    #[serde(default)]
    pub forks: i64,
    #[serde(default)]
    pub watchers: i64,
    #[serde(default)]
    pub open_issues: i64,
    #[serde(default)]
    pub size_kb: i64,
    #[serde(default)]
    pub primary_language: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub is_fork: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub owner: Option<UserFacet>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl RepositoryFacet {
    /// Repository name, derived from `full_name` when the provider omitted it
    pub fn effective_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self
                .full_name
                .rsplit_once('/')
                .map(|(_, name)| name)
                .unwrap_or(&self.full_name),
        }
    }

    /// Owner login, derived from `full_name` when the owner facet is missing
    pub fn owner_login(&self) -> Option<&str> {
        if let Some(owner) = &self.owner {
            if let Some(login) = owner.login.as_deref() {
                return Some(login);
            }
        }
        self.full_name.split_once('/').map(|(owner, _)| owner)
    }
}

/// Pull request information captured from the activity event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestFacet {
    /// PR number within the repository; the visible natural key
    pub number: i64,
    /// The provider's internal PR id; used only as the staging key
    #[serde(default)]
    pub internal_id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub author: Option<UserFacet>,
    #[serde(default)]
    pub merged_by: Option<UserFacet>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commits: i64,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub changed_files: i64,
    #[serde(default)]
    pub review_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub head_ref: Option<String>,
    #[serde(default)]
    pub base_ref: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A single commit belonging to the pull request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitFacet {
    pub sha: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Option<UserFacet>,
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub files_changed: i64,
    #[serde(default)]
    pub parent_shas: Vec<String>,
}

impl CommitFacet {
    /// A commit with more than one parent is a merge commit
    pub fn is_merge(&self) -> bool {
        self.parent_shas.len() > 1
    }
}

/// The canonical staged payload: one merged pull request with its context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(default)]
    pub repository: Option<RepositoryFacet>,
    #[serde(default)]
    pub pull_request: Option<PullRequestFacet>,
    #[serde(default)]
    pub commits: Vec<CommitFacet>,
}

impl ActivityPayload {
    /// Decodes a payload from raw JSON text
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json).map_err(|e| {
            PipelineError::SerializationError(format!("undecodable activity payload: {}", e))
        })
    }

    /// Encodes the payload to the JSON text stored in the staging table
    pub fn to_json(&self) -> Result<String, PipelineError> {
        serde_json::to_string(self).map_err(|e| {
            PipelineError::SerializationError(format!("unencodable activity payload: {}", e))
        })
    }

    /// The staged PR's number, when the pull request facet is present
    pub fn pull_request_number(&self) -> Option<i64> {
        self.pull_request.as_ref().map(|pr| pr.number)
    }
}
