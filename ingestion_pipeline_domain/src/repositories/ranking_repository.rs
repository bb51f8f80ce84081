// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Ranking-snapshot port. The metric roll-up excludes contributions whose
//! repository is a fork; the snapshot insert is one transaction so readers
//! never observe a partial snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{ContributorMetrics, ContributorRanking};
use crate::error::PipelineError;

#[async_trait]
pub trait RankingRepository: Send + Sync {
    /// Per-contributor raw metrics over non-fork repositories only.
    /// Placeholder contributors are excluded (they have no rankable
    /// identity).
    async fn collect_contributor_metrics(&self) -> Result<Vec<ContributorMetrics>, PipelineError>;

    /// Inserts a whole snapshot in a single transaction. Every row must
    /// carry `calculated_at` as its calculation timestamp.
    async fn insert_snapshot(
        &self,
        rows: &[ContributorRanking],
        calculated_at: DateTime<Utc>,
    ) -> Result<(), PipelineError>;

    /// The rows of the most recent snapshot (max calculation timestamp),
    /// ordered by rank position.
    async fn latest_snapshot(&self) -> Result<Vec<ContributorRanking>, PipelineError>;
}
