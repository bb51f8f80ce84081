// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain entities: the relational model the pipeline writes, plus the job
//! store's run records and the ranking snapshot rows.

pub mod commit;
pub mod contributor;
pub mod contributor_ranking;
pub mod contributor_repository;
pub mod merge_request;
pub mod pipeline_run;
pub mod raw_merge_request;
pub mod repository;

pub use commit::Commit;
pub use contributor::Contributor;
pub use contributor_ranking::{ContributorMetrics, ContributorRanking, DimensionScores, RankWeights};
pub use contributor_repository::ContributorRepository;
pub use merge_request::{MergeRequest, MergeRequestState};
pub use pipeline_run::{
    NewSchedule, PipelineHistory, PipelineSchedule, PipelineStatus, SchedulePatch,
};
pub use raw_merge_request::RawMergeRequest;
pub use repository::Repository;
