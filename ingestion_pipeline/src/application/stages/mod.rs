// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Stages
//!
//! The four independently runnable units of the pipeline: Sync, Process,
//! Enrich, and Rank. Each implements [`Stage`]: a cooperative batching loop
//! that drives per-item work serially (the provider's rate budget is the
//! bottleneck, so there is no per-item fan-out), checks the cancellation
//! token between items, and reports run statistics.
//!
//! Per-item work runs under a wall-clock deadline; exceeding it counts as a
//! per-item failure, not a stage failure.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use ingestion_pipeline_bootstrap::shutdown::CancellationToken;
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::value_objects::pipeline_type::PipelineType;

pub mod enrich;
pub mod process;
pub mod rank;
pub mod sync;

pub use enrich::EnrichStage;
pub use process::ProcessStage;
pub use rank::RankStage;
pub use sync::SyncStage;

/// Default wall-clock deadline for one item's work.
pub const ITEM_DEADLINE: Duration = Duration::from_secs(30);

/// How often stages flush their progress counter to the job store.
pub const PROGRESS_EVERY: u64 = 10;

/// Everything a stage execution receives from the orchestrator.
#[derive(Clone)]
pub struct StageContext {
    /// Run-scoped cancellation; also fires on process shutdown
    pub cancel: CancellationToken,
    /// History row this run reports into
    pub history_id: i64,
    /// Drain everything / wait out rate limits instead of batch-and-exit
    pub process_all: bool,
}

impl StageContext {
    /// Returns `Cancelled` if the run token has fired.
    pub fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::cancelled("stage interrupted"))
        } else {
            Ok(())
        }
    }
}

/// Run statistics a stage hands back to the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub items_seen: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub items_skipped: u64,
    pub not_found: u64,
    /// The run wound down early because the provider quota ran out
    pub rate_limit_hit: bool,
}

impl StageReport {
    /// What the history row records as `items_processed`.
    pub fn items_processed(&self) -> i64 {
        self.items_succeeded as i64
    }

    pub fn absorb(&mut self, other: StageReport) {
        self.items_seen += other.items_seen;
        self.items_succeeded += other.items_succeeded;
        self.items_failed += other.items_failed;
        self.items_skipped += other.items_skipped;
        self.not_found += other.not_found;
        self.rate_limit_hit |= other.rate_limit_hit;
    }
}

/// One independently runnable pipeline unit.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The pipeline type this stage executes.
    fn pipeline_type(&self) -> PipelineType;

    /// Runs the stage to completion (or clean early exit) and reports.
    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, PipelineError>;
}

/// Applies the per-item deadline to `work`.
pub async fn with_item_deadline<T, F>(work: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(ITEM_DEADLINE, work).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::TimeoutError(format!(
            "item exceeded the {}s deadline",
            ITEM_DEADLINE.as_secs()
        ))),
    }
}
