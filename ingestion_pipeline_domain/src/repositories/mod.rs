// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Store ports. One embedded-store implementation in the main crate serves
//! all four; keeping them separate traits keeps each stage's dependency
//! surface honest.

pub mod entity_repository;
pub mod job_repository;
pub mod ranking_repository;
pub mod raw_activity_repository;

pub use entity_repository::{
    ActivityBundle, AppliedActivity, EnrichableKind, EntityCounts, EntityRepository,
};
pub use job_repository::{JobRepository, RunOutcome};
pub use ranking_repository::RankingRepository;
pub use raw_activity_repository::{RawActivityRepository, RawUpsertOutcome};
