// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Merge Request Entity
//!
//! A pull request against a repository (the provider calls it "pull
//! request"; this codebase uses "merge request" for the entity name). The
//! natural key is `(repository_uuid, provider_id)` where `provider_id` is
//! the PR number visible in the repository, preferred over the provider's
//! internal id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::PipelineError;
use crate::value_objects::entity_id::{ContributorId, MergeRequestId, RepositoryId};

/// Merge request lifecycle state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestState {
    Open,
    Closed,
    Merged,
}

impl MergeRequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeRequestState::Open => "open",
            MergeRequestState::Closed => "closed",
            MergeRequestState::Merged => "merged",
        }
    }
}

impl Display for MergeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeRequestState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(MergeRequestState::Open),
            "closed" => Ok(MergeRequestState::Closed),
            "merged" => Ok(MergeRequestState::Merged),
            other => Err(PipelineError::validation_error(format!(
                "unknown merge request state '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    // Identity fields
    pub uuid: MergeRequestId,
    /// PR number within the repository
    pub provider_id: i64,
    pub repository_uuid: RepositoryId,
    pub repository_provider_id: i64,

    // Author / merger dual references (absent as a pair when unresolvable)
    pub author_uuid: Option<ContributorId>,
    pub author_provider_id: Option<i64>,
    pub merged_by_uuid: Option<ContributorId>,
    pub merged_by_provider_id: Option<i64>,

    // Facts
    pub state: MergeRequestState,
    pub is_draft: bool,
    pub title: String,
    pub body: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,

    // Counters
    pub commits: i64,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub review_count: i64,
    pub comment_count: i64,

    // Derived analytics (filled by enrichment)
    pub complexity_score: f64,
    pub review_time_hours: Option<f64>,
    pub cycle_time_hours: Option<f64>,

    // Branch refs and labels
    pub head_ref: Option<String>,
    pub base_ref: Option<String>,
    pub labels: Vec<String>,

    // Enrichment state
    pub is_enriched: bool,
    pub enrichment_attempts: i64,

    // Row metadata
    pub record_created_at: DateTime<Utc>,
    pub record_updated_at: DateTime<Utc>,
}

impl MergeRequest {
    /// Creates a merge request extracted from a staged payload.
    pub fn extracted(
        number: i64,
        repository_uuid: RepositoryId,
        repository_provider_id: i64,
        title: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        if number <= 0 {
            return Err(PipelineError::validation_error(format!(
                "merge request number must be positive, got {}",
                number
            )));
        }

        let now = Utc::now();
        Ok(MergeRequest {
            uuid: MergeRequestId::new(),
            provider_id: number,
            repository_uuid,
            repository_provider_id,
            author_uuid: None,
            author_provider_id: None,
            merged_by_uuid: None,
            merged_by_provider_id: None,
            state: MergeRequestState::Merged,
            is_draft: false,
            title: title.into(),
            body: None,
            created_at: None,
            updated_at: None,
            closed_at: None,
            merged_at: None,
            commits: 0,
            additions: 0,
            deletions: 0,
            changed_files: 0,
            review_count: 0,
            comment_count: 0,
            complexity_score: 0.0,
            review_time_hours: None,
            cycle_time_hours: None,
            head_ref: None,
            base_ref: None,
            labels: Vec::new(),
            is_enriched: false,
            enrichment_attempts: 0,
            record_created_at: now,
            record_updated_at: now,
        })
    }

    /// Sets both halves of the author reference together.
    pub fn set_author(&mut self, uuid: ContributorId, provider_id: i64) {
        self.author_uuid = Some(uuid);
        self.author_provider_id = Some(provider_id);
        self.record_updated_at = Utc::now();
    }

    /// Sets both halves of the merged-by reference together.
    pub fn set_merged_by(&mut self, uuid: ContributorId, provider_id: i64) {
        self.merged_by_uuid = Some(uuid);
        self.merged_by_provider_id = Some(provider_id);
        self.record_updated_at = Utc::now();
    }

    pub fn mark_enriched(&mut self) {
        self.is_enriched = true;
        self.enrichment_attempts += 1;
        self.record_updated_at = Utc::now();
    }

    pub fn record_enrichment_failure(&mut self) {
        self.enrichment_attempts += 1;
        self.record_updated_at = Utc::now();
    }

    /// Hours between creation and merge, when both timestamps are known.
    pub fn compute_cycle_time_hours(&self) -> Option<f64> {
        match (self.created_at, self.merged_at) {
            (Some(created), Some(merged)) if merged >= created => {
                Some((merged - created).num_seconds() as f64 / 3600.0)
            }
            _ => None,
        }
    }
}
