// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Scheduler
//!
//! Evaluates active schedules on a fixed tick and dispatches due pipelines
//! through the orchestrator. A type already running loses the tick (logged,
//! not an error); either way the schedule's `next_run_at` advances so a
//! slow stage cannot cause a re-fire storm.
//!
//! Single-threaded cooperative loop: the tick itself never blocks on stage
//! work - dispatch is always asynchronous.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use ingestion_pipeline_bootstrap::shutdown::CancellationToken;
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::JobRepository;
use ingestion_pipeline_domain::value_objects::pipeline_type::TriggerKind;

use super::orchestrator::PipelineOrchestrator;

/// Tick interval; well under the one-minute coarseness bound.
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

pub struct Scheduler {
    job: Arc<dyn JobRepository>,
    orchestrator: Arc<PipelineOrchestrator>,
    token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        job: Arc<dyn JobRepository>,
        orchestrator: Arc<PipelineOrchestrator>,
        token: CancellationToken,
    ) -> Self {
        Self {
            job,
            orchestrator,
            token,
        }
    }

    /// Runs the tick loop until the token fires.
    pub async fn run(&self) {
        info!(interval = ?TICK_INTERVAL, "scheduler started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick_once().await {
                warn!(error = %e, "scheduler tick failed");
            }
        }
        info!("scheduler stopped");
    }

    /// One evaluation pass over the due schedules.
    pub async fn tick_once(&self) -> Result<(), PipelineError> {
        let now = Utc::now();
        let due = self.job.due_schedules(now).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(due = due.len(), "schedules due");

        for schedule in due {
            // Advance next_run_at first: a dispatch failure must not leave
            // the schedule permanently due.
            if let Err(e) = self.job.mark_schedule_fired(schedule.id, now).await {
                warn!(schedule_id = schedule.id, error = %e, "failed to advance schedule");
                continue;
            }

            let process_all = schedule.process_all_items();
            match self
                .orchestrator
                .start(schedule.pipeline_type, TriggerKind::Scheduled, process_all, false)
                .await
            {
                Ok(_) => {
                    info!(pipeline = %schedule.pipeline_type, "scheduled run dispatched");
                }
                Err(PipelineError::AlreadyRunning(_)) => {
                    info!(pipeline = %schedule.pipeline_type, "previous run still active, skipping tick");
                }
                Err(e) => {
                    warn!(pipeline = %schedule.pipeline_type, error = %e, "scheduled dispatch failed");
                }
            }
        }
        Ok(())
    }
}
