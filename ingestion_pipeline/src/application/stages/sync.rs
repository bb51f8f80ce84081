// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sync Stage
//!
//! Discovers recently merged pull requests from the provider's public event
//! feed and durably stages their full detail (including the per-PR commit
//! list) for later extraction by the Process stage.
//!
//! Per-PR failures are counted and skipped, never fatal. A rate-limit hit
//! while fetching commit lists flushes what was staged so far and exits the
//! run as completed with the subset done; subsequent runs pick up new
//! events. Events missing their repository facet are staged as-is - the
//! Process stage rejects them with a tracked failure instead of this stage
//! crashing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{JobRepository, RawActivityRepository};
use ingestion_pipeline_domain::services::provider_client::{ProviderClient, ProviderPullRequestEvent};
use ingestion_pipeline_domain::value_objects::activity_payload::ActivityPayload;
use ingestion_pipeline_domain::value_objects::pipeline_type::PipelineType;

use super::{with_item_deadline, Stage, StageContext, StageReport, PROGRESS_EVERY};

pub struct SyncStage {
    provider: Arc<dyn ProviderClient>,
    raw: Arc<dyn RawActivityRepository>,
    job: Arc<dyn JobRepository>,
}

impl SyncStage {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        raw: Arc<dyn RawActivityRepository>,
        job: Arc<dyn JobRepository>,
    ) -> Self {
        Self { provider, raw, job }
    }

    /// Assembles and stages the canonical payload for one event.
    ///
    /// Returns `RateLimited` only; every other per-PR failure is absorbed
    /// into the payload (missing commits) or the report.
    async fn stage_event(
        &self,
        event: &ProviderPullRequestEvent,
        report: &mut StageReport,
    ) -> Result<(), PipelineError> {
        let number = event.pull_request.number;

        // Commit detail needs the repository coordinates; an event without
        // them is staged bare and rejected downstream with a tracked
        // failure.
        let commits = match &event.repository {
            Some(repo) => match repo.full_name.split_once('/') {
                Some((owner, name)) => {
                    match self
                        .provider
                        .list_pull_request_commits(owner, name, number)
                        .await
                    {
                        Ok(commits) => commits,
                        Err(PipelineError::RateLimited { reset_at }) => {
                            return Err(PipelineError::RateLimited { reset_at });
                        }
                        Err(e) => {
                            warn!(pr = number, error = %e, "commit list fetch failed, staging without commits");
                            Vec::new()
                        }
                    }
                }
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        let payload = ActivityPayload {
            repository: event.repository.clone().map(Into::into),
            pull_request: Some(event.pull_request.clone().into()),
            commits: commits.into_iter().map(Into::into).collect(),
        };

        let outcome = self
            .raw
            .upsert_raw(event.staging_key(), &payload.to_json()?)
            .await?;
        debug!(pr = number, ?outcome, "staged merged pull request");
        report.items_succeeded += 1;
        Ok(())
    }
}

#[async_trait]
impl Stage for SyncStage {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::GithubSync
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::default();

        let events = match self.provider.list_recent_merged_pull_request_events().await {
            Ok(events) => events,
            Err(PipelineError::RateLimited { reset_at }) => {
                info!(%reset_at, "rate limited before listing events, exiting cleanly");
                report.rate_limit_hit = true;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        ctx.check_cancelled()?;
        info!(count = events.len(), "merged pull request events discovered");

        for event in &events {
            ctx.check_cancelled()?;
            report.items_seen += 1;

            match with_item_deadline(self.stage_event(event, &mut report)).await {
                Ok(()) => {}
                Err(PipelineError::RateLimited { reset_at }) => {
                    // Flush what we have and exit completed with the subset
                    info!(%reset_at, staged = report.items_succeeded, "rate limited mid-run, winding down");
                    report.rate_limit_hit = true;
                    break;
                }
                Err(PipelineError::Cancelled(message)) => {
                    return Err(PipelineError::Cancelled(message));
                }
                Err(e) => {
                    warn!(pr = event.pull_request.number, error = %e, "failed to stage event");
                    report.items_failed += 1;
                }
            }

            if report.items_seen % PROGRESS_EVERY == 0 {
                self.job
                    .record_progress(ctx.history_id, report.items_processed())
                    .await;
            }
        }

        Ok(report)
    }
}
