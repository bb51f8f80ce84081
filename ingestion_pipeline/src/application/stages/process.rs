// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Process Stage
//!
//! Drains the raw staging table into the canonical entity tables. Each raw
//! row is handled in its own store transaction (`apply_activity`), so one
//! failing item never poisons its siblings, and the processed flag flips
//! inside the same transaction that writes the entities.
//!
//! Failure routing:
//! - undecodable payload or missing required facets → the row is marked
//!   processed with a failure tag (it can never yield entities, keeping it
//!   queued would clog the drain)
//! - integrity violations → same, logged at high severity (upstream bug)
//! - transient store failures (busy, I/O) → the row stays unprocessed and
//!   is retried by a later run

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use ingestion_pipeline_domain::entities::RawMergeRequest;
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{
    ActivityBundle, EntityRepository, JobRepository, RawActivityRepository,
};
use ingestion_pipeline_domain::value_objects::pipeline_type::PipelineType;

use super::{with_item_deadline, Stage, StageContext, StageReport, PROGRESS_EVERY};

pub struct ProcessStage {
    raw: Arc<dyn RawActivityRepository>,
    entities: Arc<dyn EntityRepository>,
    job: Arc<dyn JobRepository>,
    batch_size: u32,
}

/// Why a staged payload cannot be turned into entities.
fn validate_payload(row: &RawMergeRequest) -> Result<ActivityBundle, String> {
    let payload = match row.decode() {
        Ok(payload) => payload,
        Err(e) => return Err(format!("undecodable payload: {}", e)),
    };

    let Some(repository) = payload.repository else {
        return Err("payload has no repository facet".to_string());
    };
    if repository.provider_id <= 0 {
        return Err(format!(
            "repository provider id {} is not usable",
            repository.provider_id
        ));
    }
    if !repository.full_name.contains('/') {
        return Err(format!(
            "repository full name '{}' is not owner/name",
            repository.full_name
        ));
    }

    let Some(pull_request) = payload.pull_request else {
        return Err("payload has no pull request facet".to_string());
    };
    if pull_request.number <= 0 {
        return Err(format!(
            "pull request number {} is not usable",
            pull_request.number
        ));
    }

    Ok(ActivityBundle {
        raw_id: row.id,
        repository,
        pull_request,
        commits: payload.commits,
    })
}

impl ProcessStage {
    pub fn new(
        raw: Arc<dyn RawActivityRepository>,
        entities: Arc<dyn EntityRepository>,
        job: Arc<dyn JobRepository>,
        batch_size: u32,
    ) -> Self {
        Self {
            raw,
            entities,
            job,
            batch_size,
        }
    }

    async fn process_row(&self, row: &RawMergeRequest, report: &mut StageReport) {
        let bundle = match validate_payload(row) {
            Ok(bundle) => bundle,
            Err(reason) => {
                warn!(raw_id = row.id, %reason, "rejecting staged payload");
                report.items_failed += 1;
                if let Err(e) = self.raw.mark_processed_with_error(row.id, &reason).await {
                    error!(raw_id = row.id, error = %e, "failed to tag rejected payload");
                }
                return;
            }
        };

        match with_item_deadline(self.entities.apply_activity(&bundle)).await {
            Ok(applied) => {
                report.items_succeeded += 1;
                if applied.had_placeholder_author {
                    report.items_skipped += 1;
                }
            }
            Err(PipelineError::IntegrityViolation(message)) => {
                // Indicates an upstream bug; keep the drain moving
                error!(raw_id = row.id, %message, "integrity violation while extracting entities");
                report.items_failed += 1;
                if let Err(e) = self.raw.mark_processed_with_error(row.id, &message).await {
                    error!(raw_id = row.id, error = %e, "failed to tag integrity failure");
                }
            }
            Err(e) => {
                // Transient: the row stays unprocessed for the next run
                warn!(raw_id = row.id, error = %e, "extraction failed, leaving row queued");
                report.items_failed += 1;
            }
        }
    }
}

#[async_trait]
impl Stage for ProcessStage {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::DataProcessing
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::default();

        loop {
            ctx.check_cancelled()?;
            let queued_before = self.raw.count_unprocessed().await?;
            let rows = self.raw.unprocessed(self.batch_size).await?;
            if rows.is_empty() {
                break;
            }
            info!(batch = rows.len(), "processing staged payloads");

            for row in &rows {
                ctx.check_cancelled()?;
                report.items_seen += 1;
                self.process_row(row, &mut report).await;

                if report.items_seen % PROGRESS_EVERY == 0 {
                    self.job
                        .record_progress(ctx.history_id, report.items_processed())
                        .await;
                }
            }

            if !ctx.process_all {
                break;
            }
            // Transient failures leave rows queued; keep draining only
            // while the queue is actually shrinking, or process-all mode
            // would spin on a permanently failing head-of-queue.
            let queued_after = self.raw.count_unprocessed().await?;
            if queued_after == 0 || queued_after >= queued_before {
                if queued_after >= queued_before && queued_after > 0 {
                    warn!(queued = queued_after, "no progress over a full batch, winding down");
                }
                break;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw_row(payload: &str) -> RawMergeRequest {
        RawMergeRequest {
            id: 1,
            payload: payload.into(),
            is_processed: false,
            process_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_rejects_garbage_json() {
        let err = validate_payload(&raw_row("{nope")).unwrap_err();
        assert!(err.contains("undecodable"));
    }

    #[test]
    fn test_validate_rejects_missing_repository() {
        let err = validate_payload(&raw_row(r#"{"pull_request": {"number": 42}}"#)).unwrap_err();
        assert!(err.contains("repository"));
    }

    #[test]
    fn test_validate_rejects_missing_pull_request() {
        let payload = r#"{"repository": {"provider_id": 1001, "full_name": "acme/widgets"}}"#;
        let err = validate_payload(&raw_row(payload)).unwrap_err();
        assert!(err.contains("pull request"));
    }

    #[test]
    fn test_validate_rejects_bad_full_name() {
        let payload =
            r#"{"repository": {"provider_id": 1001, "full_name": "widgets"}, "pull_request": {"number": 42}}"#;
        let err = validate_payload(&raw_row(payload)).unwrap_err();
        assert!(err.contains("owner/name"));
    }

    #[test]
    fn test_validate_accepts_minimal_complete_payload() {
        let payload =
            r#"{"repository": {"provider_id": 1001, "full_name": "acme/widgets"}, "pull_request": {"number": 42}}"#;
        let bundle = validate_payload(&raw_row(payload)).unwrap();
        assert_eq!(bundle.raw_id, 1);
        assert_eq!(bundle.pull_request.number, 42);
        assert!(bundle.commits.is_empty());
    }
}
