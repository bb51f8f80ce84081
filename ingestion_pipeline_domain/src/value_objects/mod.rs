// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects: typed identifiers, the orchestration vocabulary, and the
//! canonical staged payload.

pub mod activity_payload;
pub mod entity_id;
pub mod pipeline_type;

pub use activity_payload::{ActivityPayload, CommitFacet, PullRequestFacet, RepositoryFacet, UserFacet};
pub use entity_id::{
    CommitId, ContributorId, ContributorRepositoryId, MergeRequestId, RankingId, RepositoryId,
};
pub use pipeline_type::{PipelineType, RunStatus, TriggerKind};
