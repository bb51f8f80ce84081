// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job Store Port
//!
//! Durable records of pipeline schedules, live status, and run history; the
//! source of truth for "is X running?". The singleton rule is enforced here:
//! `begin_run` performs an atomic conditional update on the status row, and
//! losing the race returns `AlreadyRunning` rather than a second run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{NewSchedule, PipelineHistory, PipelineSchedule, PipelineStatus, SchedulePatch};
use crate::error::PipelineError;
use crate::value_objects::pipeline_type::{PipelineType, RunStatus, TriggerKind};

/// Terminal outcome reported by a finishing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Stopped,
}

impl RunOutcome {
    pub fn as_run_status(&self) -> RunStatus {
        match self {
            RunOutcome::Completed => RunStatus::Completed,
            RunOutcome::Failed => RunStatus::Failed,
            RunOutcome::Stopped => RunStatus::Stopped,
        }
    }
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Atomically claims the per-type run slot and opens a history row in
    /// `running`. Returns the history id, or `AlreadyRunning` if the slot is
    /// taken.
    async fn begin_run(
        &self,
        pipeline: PipelineType,
        trigger: TriggerKind,
    ) -> Result<i64, PipelineError>;

    /// Closes a run: terminal status on the history row, status row cleared,
    /// `last_run` stamped. Idempotent; closing an already-closed run is a
    /// no-op.
    async fn end_run(
        &self,
        history_id: i64,
        outcome: RunOutcome,
        items_processed: i64,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError>;

    /// Best-effort progress counter update. Failures are swallowed and
    /// logged by the implementation; they never fail the job.
    async fn record_progress(&self, history_id: i64, items_processed: i64);

    /// The status row for one pipeline type.
    async fn status(&self, pipeline: PipelineType) -> Result<PipelineStatus, PipelineError>;

    /// Status rows for every pipeline type.
    async fn all_statuses(&self) -> Result<Vec<PipelineStatus>, PipelineError>;

    /// History page, newest first, optionally filtered by type.
    async fn history(
        &self,
        pipeline: Option<PipelineType>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PipelineHistory>, PipelineError>;

    /// One history row by id.
    async fn find_history(&self, history_id: i64) -> Result<Option<PipelineHistory>, PipelineError>;

    /// Startup repair: marks dangling `running` rows `failed` with message
    /// `process terminated` and clears the status rows. Returns rows
    /// repaired. Runs before the scheduler starts ticking.
    async fn repair_dangling_runs(&self) -> Result<u64, PipelineError>;

    // ----- schedules ----------------------------------------------------------

    async fn list_schedules(&self) -> Result<Vec<PipelineSchedule>, PipelineError>;

    async fn find_schedule(&self, id: i64) -> Result<Option<PipelineSchedule>, PipelineError>;

    async fn create_schedule(&self, schedule: &NewSchedule) -> Result<PipelineSchedule, PipelineError>;

    async fn update_schedule(
        &self,
        id: i64,
        patch: &SchedulePatch,
    ) -> Result<PipelineSchedule, PipelineError>;

    /// Returns whether a row was deleted.
    async fn delete_schedule(&self, id: i64) -> Result<bool, PipelineError>;

    /// Active schedules whose `next_run_at` has elapsed.
    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<PipelineSchedule>, PipelineError>;

    /// Stamps `last_run_at` and recomputes `next_run_at` from the stored
    /// cron expression after a tick fires (or skips) a schedule.
    async fn mark_schedule_fired(&self, id: i64, fired_at: DateTime<Utc>)
        -> Result<(), PipelineError>;

    /// Seeds one inactive default schedule per pipeline type on first
    /// startup; re-running is a no-op.
    async fn seed_default_schedules(&self) -> Result<u64, PipelineError>;
}
