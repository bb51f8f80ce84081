// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Orchestrator
//!
//! Coordinates stage execution: claims the per-type run slot through the
//! job store, hands the stage a run-scoped cancellation token, closes the
//! history row with the stage's outcome, and keeps the in-process registry
//! of running stages the stop endpoint cancels through.
//!
//! The singleton rule is the job store's (`begin_run` wins or returns
//! `AlreadyRunning`); the orchestrator adds only what must live in-process:
//! the cancellation handles and the lifecycle bookkeeping around
//! `execute()`. Distinct pipeline types run in parallel - enrichment never
//! blocks sync.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use ingestion_pipeline_bootstrap::shutdown::CancellationToken;
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{JobRepository, RunOutcome};
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

use crate::application::stages::{Stage, StageContext, StageReport};
use crate::infrastructure::metrics::MetricsService;

/// How long `restart` waits for the previous run to release the slot.
const RESTART_GRACE: Duration = Duration::from_secs(15);
const RESTART_POLL: Duration = Duration::from_millis(200);

/// What a start request produced.
#[derive(Debug)]
pub enum StartOutcome {
    /// Direct execution: the stage ran to completion inline
    Completed {
        history_id: i64,
        report: StageReport,
    },
    /// Asynchronous execution: the run continues in the background
    Started { history_id: i64 },
}

#[derive(Clone)]
struct RunHandle {
    history_id: i64,
    token: CancellationToken,
}

pub struct PipelineOrchestrator {
    job: Arc<dyn JobRepository>,
    stages: HashMap<PipelineType, Arc<dyn Stage>>,
    metrics: Arc<MetricsService>,
    root: CancellationToken,
    running: Arc<Mutex<HashMap<PipelineType, RunHandle>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        job: Arc<dyn JobRepository>,
        stages: Vec<Arc<dyn Stage>>,
        metrics: Arc<MetricsService>,
        root: CancellationToken,
    ) -> Self {
        let stages = stages
            .into_iter()
            .map(|stage| (stage.pipeline_type(), stage))
            .collect();
        Self {
            job,
            stages,
            metrics,
            root,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Startup sequence, run before the scheduler begins ticking: repair
    /// dangling `running` rows from a crashed process and seed defaults.
    pub async fn startup(&self) -> Result<(), PipelineError> {
        let repaired = self.job.repair_dangling_runs().await?;
        if repaired > 0 {
            warn!(repaired, "closed runs left dangling by a previous process");
        }
        self.job.seed_default_schedules().await?;
        self.job.all_statuses().await?;
        Ok(())
    }

    /// Starts a run of `pipeline`. `wait` makes execution synchronous
    /// (direct execution on the control plane, the CLI `run` command).
    pub async fn start(
        &self,
        pipeline: PipelineType,
        trigger: TriggerKind,
        process_all: bool,
        wait: bool,
    ) -> Result<StartOutcome, PipelineError> {
        let Some(stage) = self.stages.get(&pipeline).cloned() else {
            return Err(PipelineError::validation_error(format!(
                "pipeline type '{}' has no registered stage in this process",
                pipeline
            )));
        };

        let history_id = self.job.begin_run(pipeline, trigger).await?;
        self.metrics.record_run_started(pipeline);

        // Run-scoped token, also fired by process shutdown
        let run_token = CancellationToken::new();
        let forwarder = {
            let root = self.root.clone();
            let run = run_token.clone();
            tokio::spawn(async move {
                root.cancelled().await;
                run.cancel();
            })
        };
        self.running.lock().insert(
            pipeline,
            RunHandle {
                history_id,
                token: run_token.clone(),
            },
        );

        let ctx = StageContext {
            cancel: run_token,
            history_id,
            process_all,
        };

        let job = Arc::clone(&self.job);
        let metrics = Arc::clone(&self.metrics);
        let running = Arc::clone(&self.running);
        let execution = async move {
            info!(pipeline = %pipeline, history_id, "stage executing");
            let result = stage.execute(&ctx).await;

            let (outcome, items, error_message) = match &result {
                Ok(report) => (RunOutcome::Completed, report.items_processed(), None),
                Err(PipelineError::Cancelled(_)) => (RunOutcome::Stopped, 0, None),
                Err(e) => (RunOutcome::Failed, 0, Some(e.to_string())),
            };

            if let Err(e) = job
                .end_run(history_id, outcome, items, error_message.as_deref())
                .await
            {
                error!(history_id, error = %e, "failed to close run");
            }
            metrics.record_run_finished(pipeline, outcome, items);

            // Only remove our own handle; a restart may have raced a new one in
            let mut map = running.lock();
            if map
                .get(&pipeline)
                .is_some_and(|handle| handle.history_id == history_id)
            {
                map.remove(&pipeline);
            }
            drop(map);
            forwarder.abort();

            result
        };

        if wait {
            let report = execution.await?;
            Ok(StartOutcome::Completed { history_id, report })
        } else {
            tokio::spawn(async move {
                if let Err(e) = execution.await {
                    warn!(error = %e, "background run finished with error");
                }
            });
            Ok(StartOutcome::Started { history_id })
        }
    }

    /// Cancels the running stage of `pipeline`, if any. When `history_id`
    /// is given, only that specific run is cancelled. Returns whether a
    /// run was signalled.
    pub fn stop(&self, pipeline: PipelineType, history_id: Option<i64>) -> bool {
        let map = self.running.lock();
        match map.get(&pipeline) {
            Some(handle) if history_id.is_none_or(|id| id == handle.history_id) => {
                info!(pipeline = %pipeline, history_id = handle.history_id, "stopping run");
                handle.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Stop-if-running, wait for the slot to free, then start.
    pub async fn restart(
        &self,
        pipeline: PipelineType,
        trigger: TriggerKind,
        process_all: bool,
        wait: bool,
    ) -> Result<StartOutcome, PipelineError> {
        if self.stop(pipeline, None) {
            self.await_idle(pipeline).await?;
        }
        self.start(pipeline, trigger, process_all, wait).await
    }

    /// The history id of the currently running stage of `pipeline`.
    pub fn running_history_id(&self, pipeline: PipelineType) -> Option<i64> {
        self.running.lock().get(&pipeline).map(|h| h.history_id)
    }

    async fn await_idle(&self, pipeline: PipelineType) -> Result<(), PipelineError> {
        let deadline = tokio::time::Instant::now() + RESTART_GRACE;
        loop {
            let status = self.job.status(pipeline).await?;
            if !status.is_running {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PipelineError::TimeoutError(format!(
                    "pipeline '{}' did not stop within {:?}",
                    pipeline, RESTART_GRACE
                )));
            }
            tokio::time::sleep(RESTART_POLL).await;
        }
    }
}
