// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Commit entity. The SHA is the provider-side natural key and is carried in
//! `provider_id`; the natural uniqueness constraint is
//! `(repository_uuid, provider_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::value_objects::entity_id::{CommitId, ContributorId, MergeRequestId, RepositoryId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    // Identity fields
    pub uuid: CommitId,
    /// The commit SHA
    pub provider_id: String,
    pub repository_uuid: RepositoryId,
    pub repository_provider_id: i64,

    // Author dual reference (absent as a pair for unknown authors)
    pub contributor_uuid: Option<ContributorId>,
    pub contributor_provider_id: Option<i64>,

    // Pull request link (absent for commits discovered outside a PR)
    pub pull_request_uuid: Option<MergeRequestId>,
    pub pull_request_provider_id: Option<i64>,

    // Facts
    pub message: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub additions: i64,
    pub deletions: i64,
    pub files_changed: i64,
    pub is_merge_commit: bool,
    pub is_placeholder_author: bool,
    pub parent_shas: Vec<String>,

    // Enrichment state
    pub is_enriched: bool,
    pub enrichment_attempts: i64,

    // Row metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Commit {
    /// Creates a commit extracted from a staged payload.
    pub fn extracted(
        sha: impl Into<String>,
        repository_uuid: RepositoryId,
        repository_provider_id: i64,
    ) -> Result<Self, PipelineError> {
        let sha = sha.into();
        if sha.is_empty() {
            return Err(PipelineError::validation_error("commit sha cannot be empty"));
        }

        let now = Utc::now();
        Ok(Commit {
            uuid: CommitId::new(),
            provider_id: sha,
            repository_uuid,
            repository_provider_id,
            contributor_uuid: None,
            contributor_provider_id: None,
            pull_request_uuid: None,
            pull_request_provider_id: None,
            message: String::new(),
            committed_at: None,
            additions: 0,
            deletions: 0,
            files_changed: 0,
            is_merge_commit: false,
            is_placeholder_author: false,
            parent_shas: Vec::new(),
            is_enriched: false,
            enrichment_attempts: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sets both halves of the author reference together.
    pub fn set_author(&mut self, uuid: ContributorId, provider_id: i64) {
        self.contributor_uuid = Some(uuid);
        self.contributor_provider_id = Some(provider_id);
        self.is_placeholder_author = false;
        self.updated_at = Utc::now();
    }

    /// Links this commit to the merge request it arrived with.
    pub fn link_merge_request(&mut self, uuid: MergeRequestId, number: i64) {
        self.pull_request_uuid = Some(uuid);
        self.pull_request_provider_id = Some(number);
        self.updated_at = Utc::now();
    }

    pub fn mark_enriched(&mut self) {
        self.is_enriched = true;
        self.enrichment_attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn record_enrichment_failure(&mut self) {
        self.enrichment_attempts += 1;
        self.updated_at = Utc::now();
    }
}
