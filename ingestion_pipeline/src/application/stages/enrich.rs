// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Enrich Stage
//!
//! Second-pass fetch that fills in provider detail the original activity
//! event did not carry. Four sub-phases run sequentially per invocation:
//! repositories, contributors, merge requests, and (in process-all mode)
//! commits.
//!
//! Outcome policy per entity:
//! - success → merge detail, flip `is_enriched`, count the attempt
//! - not-found → flip `is_enriched` with no detail so it is never retried
//! - rate-limited → wait out the reset and retry when `process_all`,
//!   otherwise finish the run cleanly with the remainder left for next time
//! - anything else → count the attempt only; the entity drops out of
//!   selection once it reaches the attempt cap
//!
//! Contributor fetches go by provider id, never by login (logins get
//! renamed); a successful fetch reconciles the stored username.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{EnrichableKind, EntityRepository, JobRepository};
use ingestion_pipeline_domain::services::provider_client::ProviderClient;
use ingestion_pipeline_domain::value_objects::pipeline_type::PipelineType;

use super::{with_item_deadline, Stage, StageContext, StageReport};

/// Page size when a run drains only one batch.
const BATCH_LIMIT: u32 = 5;
/// Page size per select in process-all mode.
const PROCESS_ALL_LIMIT: u32 = 25;

pub struct EnrichStage {
    provider: Arc<dyn ProviderClient>,
    entities: Arc<dyn EntityRepository>,
    job: Arc<dyn JobRepository>,
    max_attempts: i64,
}

/// What the shared outcome handler decided about one entity.
enum ItemOutcome {
    Done,
    /// Quota exhausted and the run should wind down
    WindDown,
}

impl EnrichStage {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        entities: Arc<dyn EntityRepository>,
        job: Arc<dyn JobRepository>,
        max_attempts: i64,
    ) -> Self {
        Self {
            provider,
            entities,
            job,
            max_attempts,
        }
    }

    fn limit(&self, ctx: &StageContext) -> u32 {
        if ctx.process_all {
            PROCESS_ALL_LIMIT
        } else {
            BATCH_LIMIT
        }
    }

    /// Routes one fetch-and-apply result per the outcome policy. The
    /// `fetch_apply` future performs the provider call and, on success, the
    /// store merge.
    async fn handle_outcome(
        &self,
        ctx: &StageContext,
        kind: EnrichableKind,
        uuid: uuid::Uuid,
        result: Result<(), PipelineError>,
        report: &mut StageReport,
    ) -> Result<ItemOutcome, PipelineError> {
        match result {
            Ok(()) => {
                report.items_succeeded += 1;
                Ok(ItemOutcome::Done)
            }
            Err(PipelineError::NotFound(what)) => {
                debug!(kind = kind.as_str(), %uuid, %what, "entity gone upstream, retiring");
                self.entities.mark_enriched_not_found(kind, uuid).await?;
                report.not_found += 1;
                report.items_succeeded += 1;
                Ok(ItemOutcome::Done)
            }
            Err(PipelineError::RateLimited { reset_at }) => {
                if ctx.process_all {
                    let wait = (reset_at - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::from_secs(1))
                        + Duration::from_secs(1);
                    info!(kind = kind.as_str(), ?wait, "rate limited, awaiting reset");
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {
                            return Err(PipelineError::cancelled("enrichment interrupted during rate-limit wait"));
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                    // Retry is driven by the caller re-selecting; the
                    // entity was neither marked nor counted.
                    report.items_skipped += 1;
                    Ok(ItemOutcome::Done)
                } else {
                    info!(kind = kind.as_str(), %reset_at, "rate limited, finishing batch early");
                    report.rate_limit_hit = true;
                    Ok(ItemOutcome::WindDown)
                }
            }
            Err(PipelineError::Cancelled(message)) => Err(PipelineError::Cancelled(message)),
            Err(e) => {
                warn!(kind = kind.as_str(), %uuid, error = %e, "enrichment attempt failed");
                self.entities.record_enrichment_failure(kind, uuid).await?;
                report.items_failed += 1;
                Ok(ItemOutcome::Done)
            }
        }
    }

    async fn enrich_repositories(
        &self,
        ctx: &StageContext,
        report: &mut StageReport,
    ) -> Result<bool, PipelineError> {
        loop {
            ctx.check_cancelled()?;
            let page = self
                .entities
                .unenriched_repositories(self.limit(ctx), self.max_attempts)
                .await?;
            if page.is_empty() {
                return Ok(true);
            }

            for repo in &page {
                ctx.check_cancelled()?;
                report.items_seen += 1;
                let Some((owner, name)) = repo.full_name.split_once('/') else {
                    // Unfetchable coordinates; count the attempt and move on
                    self.entities
                        .record_enrichment_failure(EnrichableKind::Repository, repo.uuid.as_uuid())
                        .await?;
                    report.items_failed += 1;
                    continue;
                };

                let result = with_item_deadline(async {
                    let detail = self.provider.get_repository(owner, name).await?;
                    self.entities
                        .apply_repository_enrichment(repo.uuid, &detail)
                        .await
                })
                .await;

                match self
                    .handle_outcome(ctx, EnrichableKind::Repository, repo.uuid.as_uuid(), result, report)
                    .await?
                {
                    ItemOutcome::Done => {}
                    ItemOutcome::WindDown => return Ok(false),
                }
            }

            self.job
                .record_progress(ctx.history_id, report.items_processed())
                .await;
            if !ctx.process_all {
                return Ok(true);
            }
        }
    }

    async fn enrich_contributors(
        &self,
        ctx: &StageContext,
        report: &mut StageReport,
    ) -> Result<bool, PipelineError> {
        // Pre-pass: identities that can never resolve are retired up front
        // so the partial index filters them permanently.
        let retired = self.entities.retire_unenrichable_contributors().await?;
        if retired > 0 {
            info!(retired, "retired unenrichable contributors");
        }

        loop {
            ctx.check_cancelled()?;
            let page = self
                .entities
                .unenriched_contributors(self.limit(ctx), self.max_attempts)
                .await?;
            if page.is_empty() {
                return Ok(true);
            }

            for contributor in &page {
                ctx.check_cancelled()?;
                report.items_seen += 1;

                // Fetch by provider id; logins are mutable upstream
                let result = with_item_deadline(async {
                    let detail = self.provider.get_user(contributor.provider_id).await?;
                    if detail.login.as_deref() != contributor.username.as_deref() {
                        debug!(
                            provider_id = contributor.provider_id,
                            old = ?contributor.username,
                            new = ?detail.login,
                            "username changed upstream, reconciling"
                        );
                    }
                    self.entities
                        .apply_contributor_enrichment(contributor.uuid, &detail)
                        .await
                })
                .await;

                match self
                    .handle_outcome(
                        ctx,
                        EnrichableKind::Contributor,
                        contributor.uuid.as_uuid(),
                        result,
                        report,
                    )
                    .await?
                {
                    ItemOutcome::Done => {}
                    ItemOutcome::WindDown => return Ok(false),
                }
            }

            self.job
                .record_progress(ctx.history_id, report.items_processed())
                .await;
            if !ctx.process_all {
                return Ok(true);
            }
        }
    }

    async fn enrich_merge_requests(
        &self,
        ctx: &StageContext,
        report: &mut StageReport,
    ) -> Result<bool, PipelineError> {
        loop {
            ctx.check_cancelled()?;
            let page = self
                .entities
                .unenriched_merge_requests(self.limit(ctx), self.max_attempts)
                .await?;
            if page.is_empty() {
                return Ok(true);
            }

            for mr in &page {
                ctx.check_cancelled()?;
                report.items_seen += 1;

                let repository = self
                    .entities
                    .find_repository_by_uuid(mr.repository_uuid)
                    .await?;
                let Some(repository) = repository else {
                    // Parent vanished (external deletion); nothing to fetch
                    self.entities
                        .mark_enriched_not_found(EnrichableKind::MergeRequest, mr.uuid.as_uuid())
                        .await?;
                    report.not_found += 1;
                    continue;
                };
                let Some((owner, name)) = repository.full_name.split_once('/') else {
                    self.entities
                        .record_enrichment_failure(EnrichableKind::MergeRequest, mr.uuid.as_uuid())
                        .await?;
                    report.items_failed += 1;
                    continue;
                };

                let result = with_item_deadline(async {
                    let detail = self
                        .provider
                        .get_pull_request(owner, name, mr.provider_id)
                        .await?;
                    self.entities
                        .apply_merge_request_enrichment(mr.uuid, &detail)
                        .await
                })
                .await;

                match self
                    .handle_outcome(ctx, EnrichableKind::MergeRequest, mr.uuid.as_uuid(), result, report)
                    .await?
                {
                    ItemOutcome::Done => {}
                    ItemOutcome::WindDown => return Ok(false),
                }
            }

            self.job
                .record_progress(ctx.history_id, report.items_processed())
                .await;
            if !ctx.process_all {
                return Ok(true);
            }
        }
    }

    async fn enrich_commits(
        &self,
        ctx: &StageContext,
        report: &mut StageReport,
    ) -> Result<bool, PipelineError> {
        loop {
            ctx.check_cancelled()?;
            let page = self
                .entities
                .unenriched_commits(self.limit(ctx), self.max_attempts)
                .await?;
            if page.is_empty() {
                return Ok(true);
            }

            for commit in &page {
                ctx.check_cancelled()?;
                report.items_seen += 1;

                let repository = self
                    .entities
                    .find_repository_by_uuid(commit.repository_uuid)
                    .await?;
                let Some(repository) = repository else {
                    self.entities
                        .mark_enriched_not_found(EnrichableKind::Commit, commit.uuid.as_uuid())
                        .await?;
                    report.not_found += 1;
                    continue;
                };
                let Some((owner, name)) = repository.full_name.split_once('/') else {
                    self.entities
                        .record_enrichment_failure(EnrichableKind::Commit, commit.uuid.as_uuid())
                        .await?;
                    report.items_failed += 1;
                    continue;
                };

                let result = with_item_deadline(async {
                    let detail = self
                        .provider
                        .get_commit(owner, name, &commit.provider_id)
                        .await?;
                    self.entities
                        .apply_commit_enrichment(commit.uuid.as_uuid(), &detail)
                        .await
                })
                .await;

                match self
                    .handle_outcome(ctx, EnrichableKind::Commit, commit.uuid.as_uuid(), result, report)
                    .await?
                {
                    ItemOutcome::Done => {}
                    ItemOutcome::WindDown => return Ok(false),
                }
            }

            self.job
                .record_progress(ctx.history_id, report.items_processed())
                .await;
        }
    }
}

#[async_trait]
impl Stage for EnrichStage {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::DataEnrichment
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::default();

        if !self.enrich_repositories(ctx, &mut report).await? {
            return Ok(report);
        }
        if !self.enrich_contributors(ctx, &mut report).await? {
            return Ok(report);
        }
        if !self.enrich_merge_requests(ctx, &mut report).await? {
            return Ok(report);
        }
        // Commit detail is a large request volume for modest analytic
        // value; only drained in process-all runs.
        if ctx.process_all && !self.enrich_commits(ctx, &mut report).await? {
            return Ok(report);
        }

        Ok(report)
    }
}
