// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entity Store Port
//!
//! The store contract the Process and Enrich stages depend on. Two method
//! families:
//!
//! - **`apply_activity`** - the Process stage's single-transaction step: all
//!   entity upserts extracted from one staged payload, the junction roll-up,
//!   and the raw row's processed flag commit or roll back together. Upserts
//!   are keyed by natural keys and resolve to stable uuids, so replaying the
//!   same payload is observationally a no-op.
//! - **Enrichment selects and updates** - deterministic pages of unenriched
//!   entities (insertion order, attempt-capped) and the per-outcome updates:
//!   merge-and-mark on success, mark-only on not-found, attempt bump on
//!   failure.
//!
//! Implementations enforce the natural-key uniqueness constraints in the
//! database itself, not in application code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Commit, Contributor, ContributorRepository, MergeRequest, Repository};
use crate::error::PipelineError;
use crate::services::provider_client::{
    ProviderCommit, ProviderPullRequest, ProviderRepository, ProviderUser,
};
use crate::value_objects::activity_payload::{CommitFacet, PullRequestFacet, RepositoryFacet};
use crate::value_objects::entity_id::{ContributorId, MergeRequestId, RepositoryId};

/// A validated staged payload ready for transactional extraction: the raw
/// row it came from plus the facets Process requires to be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityBundle {
    pub raw_id: i64,
    pub repository: RepositoryFacet,
    pub pull_request: PullRequestFacet,
    pub commits: Vec<CommitFacet>,
}

/// What one `apply_activity` transaction produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedActivity {
    pub repository_uuid: RepositoryId,
    pub merge_request_uuid: MergeRequestId,
    /// Absent when the PR author was unresolvable (placeholder downstream)
    pub author_uuid: Option<ContributorId>,
    pub commits_upserted: u64,
    pub had_placeholder_author: bool,
}

/// The entity families the Enrich stage walks, in sub-phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichableKind {
    Repository,
    Contributor,
    MergeRequest,
    Commit,
}

impl EnrichableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichableKind::Repository => "repository",
            EnrichableKind::Contributor => "contributor",
            EnrichableKind::MergeRequest => "merge_request",
            EnrichableKind::Commit => "commit",
        }
    }
}

/// Row counts per entity table, for health output and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub repositories: u64,
    pub contributors: u64,
    pub merge_requests: u64,
    pub commits: u64,
    pub contributor_repositories: u64,
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Applies one staged payload in a single transaction (see module docs).
    async fn apply_activity(&self, bundle: &ActivityBundle) -> Result<AppliedActivity, PipelineError>;

    // ----- enrichment selects -------------------------------------------------

    /// Unenriched repositories, oldest first, `enrichment_attempts < max_attempts`.
    async fn unenriched_repositories(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<Repository>, PipelineError>;

    /// Unenriched, non-placeholder contributors, oldest first.
    async fn unenriched_contributors(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<Contributor>, PipelineError>;

    /// Unenriched merge requests, oldest first.
    async fn unenriched_merge_requests(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<MergeRequest>, PipelineError>;

    /// Unenriched commits, oldest first.
    async fn unenriched_commits(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<Commit>, PipelineError>;

    /// Pre-pass: permanently retires contributors that can never be enriched
    /// (placeholders and rows without a usable provider id) by marking them
    /// enriched. Returns the number of rows retired.
    async fn retire_unenrichable_contributors(&self) -> Result<u64, PipelineError>;

    // ----- enrichment updates -------------------------------------------------

    /// Merges repository detail and marks the row enriched.
    async fn apply_repository_enrichment(
        &self,
        uuid: RepositoryId,
        detail: &ProviderRepository,
    ) -> Result<(), PipelineError>;

    /// Merges user detail, reconciles the username, and marks the row
    /// enriched.
    async fn apply_contributor_enrichment(
        &self,
        uuid: ContributorId,
        detail: &ProviderUser,
    ) -> Result<(), PipelineError>;

    /// Merges pull request detail and marks the row enriched.
    async fn apply_merge_request_enrichment(
        &self,
        uuid: MergeRequestId,
        detail: &ProviderPullRequest,
    ) -> Result<(), PipelineError>;

    /// Merges commit detail and marks the row enriched.
    async fn apply_commit_enrichment(
        &self,
        uuid: Uuid,
        detail: &ProviderCommit,
    ) -> Result<(), PipelineError>;

    /// Marks an entity enriched without detail (provider returned not-found)
    /// so it is never retried.
    async fn mark_enriched_not_found(
        &self,
        kind: EnrichableKind,
        uuid: Uuid,
    ) -> Result<(), PipelineError>;

    /// Counts a failed enrichment attempt without flipping the flag.
    async fn record_enrichment_failure(
        &self,
        kind: EnrichableKind,
        uuid: Uuid,
    ) -> Result<(), PipelineError>;

    // ----- lookups ------------------------------------------------------------

    async fn find_repository_by_provider_id(
        &self,
        provider_id: i64,
    ) -> Result<Option<Repository>, PipelineError>;

    async fn find_repository_by_uuid(
        &self,
        uuid: RepositoryId,
    ) -> Result<Option<Repository>, PipelineError>;

    async fn find_contributor_by_provider_id(
        &self,
        provider_id: i64,
    ) -> Result<Option<Contributor>, PipelineError>;

    /// Looks up a merge request by its natural key.
    async fn find_merge_request(
        &self,
        repository_uuid: RepositoryId,
        number: i64,
    ) -> Result<Option<MergeRequest>, PipelineError>;

    async fn commits_for_merge_request(
        &self,
        merge_request_uuid: MergeRequestId,
    ) -> Result<Vec<Commit>, PipelineError>;

    async fn find_contributor_repository(
        &self,
        contributor_uuid: ContributorId,
        repository_uuid: RepositoryId,
    ) -> Result<Option<ContributorRepository>, PipelineError>;

    async fn entity_counts(&self) -> Result<EntityCounts, PipelineError>;
}
