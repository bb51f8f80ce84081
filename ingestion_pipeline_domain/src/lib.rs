// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Ingestion Pipeline Domain
//!
//! The domain layer of the activity ingestion pipeline: the relational model
//! of repositories, contributors, merge requests, and commits; the job
//! store's run records; and the ports the stages drive. It is completely
//! independent of external concerns - no database driver, no HTTP transport,
//! no async runtime beyond the trait signatures.
//!
//! ## Module Structure
//!
//! - `entities` - the mutable model rows with identity: `Repository`,
//!   `Contributor`, `MergeRequest`, `Commit`, the junction roll-up, the raw
//!   staging row, pipeline run records, and ranking snapshot rows
//! - `value_objects` - immutable, self-validating values: typed UUID
//!   identifiers, the orchestration vocabulary (`PipelineType`,
//!   `TriggerKind`, `RunStatus`), and the canonical staged payload
//! - `repositories` - store ports (entity, raw staging, job, ranking)
//! - `services` - the provider-client port and its typed wire records
//! - `error` - the `PipelineError` failure vocabulary shared by every layer
//!
//! ## Key Invariants
//!
//! - Every entity's provider id is unique within its type; merge requests
//!   and commits are additionally unique on `(repository, provider_id)`
//! - Dual references (`*_uuid`, `*_provider_id`) are set and persisted as a
//!   pair, never half-updated
//! - `is_enriched` transitions false → true once; `enrichment_attempts` only
//!   increments
//! - At most one run per pipeline type is `running` at any time
//! - A raw staging row is processed at most once
//! - A ranking snapshot is atomic: one calculation timestamp, one
//!   transaction, contiguous rank positions

pub mod entities;
pub mod error;
pub mod repositories;
pub mod services;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    Commit, Contributor, ContributorMetrics, ContributorRanking, ContributorRepository,
    DimensionScores, MergeRequest, MergeRequestState, NewSchedule, PipelineHistory,
    PipelineSchedule, PipelineStatus, RankWeights, RawMergeRequest, Repository, SchedulePatch,
};
pub use error::PipelineError;
pub use repositories::{
    ActivityBundle, AppliedActivity, EnrichableKind, EntityCounts, EntityRepository,
    JobRepository, RankingRepository, RawActivityRepository, RawUpsertOutcome, RunOutcome,
};
pub use services::{
    ProviderClient, ProviderCommit, ProviderPullRequest, ProviderPullRequestEvent,
    ProviderRepository, ProviderUser, ProviderUserSummary, RateLimitSnapshot,
};
pub use value_objects::{
    ActivityPayload, CommitFacet, CommitId, ContributorId, MergeRequestId, PipelineType,
    PullRequestFacet, RepositoryFacet, RepositoryId, RunStatus, TriggerKind, UserFacet,
};
