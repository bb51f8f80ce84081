// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Rank Stage
//!
//! Recomputes contributor rankings into a time-stamped snapshot. Raw
//! metrics come from the store roll-up (fork repositories excluded);
//! dimension scores are normalized into [0, 100] relative to the cohort
//! maximum, which keeps each score monotonic in its raw input and bounded;
//! the weighted total orders the snapshot, ties broken by provider id so
//! reruns over identical data produce identical positions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use ingestion_pipeline_domain::entities::{
    ContributorMetrics, ContributorRanking, DimensionScores, RankWeights,
};
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::RankingRepository;
use ingestion_pipeline_domain::value_objects::entity_id::RankingId;
use ingestion_pipeline_domain::value_objects::pipeline_type::PipelineType;

use super::{Stage, StageContext, StageReport};

pub struct RankStage {
    ranking: Arc<dyn RankingRepository>,
    weights: RankWeights,
}

/// Cohort maxima used to normalize the dimension scores.
#[derive(Debug, Default, Clone, Copy)]
struct CohortMaxima {
    churn: i64,
    commits: i64,
    merge_requests: i64,
    repositories: i64,
    followers: i64,
    reviews: i64,
}

impl CohortMaxima {
    fn of(metrics: &[ContributorMetrics]) -> Self {
        let mut maxima = CohortMaxima::default();
        for m in metrics {
            maxima.churn = maxima.churn.max(m.lines_added + m.lines_removed);
            maxima.commits = maxima.commits.max(m.commit_count);
            maxima.merge_requests = maxima.merge_requests.max(m.merge_request_count);
            maxima.repositories = maxima.repositories.max(m.repositories_contributed);
            maxima.followers = maxima.followers.max(m.followers);
            maxima.reviews = maxima.reviews.max(m.review_count);
        }
        maxima
    }
}

/// `value` relative to the cohort maximum, scaled into [0, 100].
fn scale(value: i64, max: i64) -> f64 {
    if max <= 0 || value <= 0 {
        return 0.0;
    }
    (value as f64 / max as f64 * 100.0).clamp(0.0, 100.0)
}

/// Number of profile fields the completeness dimension considers.
const PROFILE_FIELDS: i64 = 6;

fn score(metrics: &ContributorMetrics, maxima: &CohortMaxima) -> DimensionScores {
    let churn = metrics.lines_added + metrics.lines_removed;
    let efficiency = if churn > 0 {
        (metrics.lines_added as f64 / churn as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    DimensionScores {
        volume: scale(churn, maxima.churn),
        efficiency,
        impact: scale(metrics.commit_count, maxima.commits),
        influence: scale(metrics.merge_request_count, maxima.merge_requests),
        popularity: scale(metrics.repositories_contributed, maxima.repositories),
        followers: scale(metrics.followers, maxima.followers),
        profile_completeness: scale(
            metrics.profile_fields_filled.min(PROFILE_FIELDS),
            PROFILE_FIELDS,
        ),
        collaboration: scale(metrics.review_count, maxima.reviews),
    }
}

/// Computes a full snapshot from the metric roll-up: scored, ordered, and
/// positioned 1..=N with a deterministic tie-break.
pub fn build_snapshot(
    metrics: &[ContributorMetrics],
    weights: &RankWeights,
    calculated_at: chrono::DateTime<Utc>,
) -> Vec<ContributorRanking> {
    let maxima = CohortMaxima::of(metrics);

    let mut scored: Vec<(f64, DimensionScores, &ContributorMetrics)> = metrics
        .iter()
        .map(|m| {
            let scores = score(m, &maxima);
            (weights.total_score(&scores), scores, m)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.contributor_provider_id.cmp(&b.2.contributor_provider_id))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(index, (total, scores, m))| ContributorRanking {
            uuid: RankingId::new(),
            contributor_uuid: m.contributor_uuid,
            contributor_provider_id: m.contributor_provider_id,
            username: m.username.clone(),
            rank_position: index as i64 + 1,
            total_score: total,
            volume_score: scores.volume,
            efficiency_score: scores.efficiency,
            impact_score: scores.impact,
            influence_score: scores.influence,
            popularity_score: scores.popularity,
            followers_score: scores.followers,
            profile_completeness_score: scores.profile_completeness,
            collaboration_score: scores.collaboration,
            raw_lines_added: m.lines_added,
            raw_lines_removed: m.lines_removed,
            raw_commits: m.commit_count,
            raw_merge_requests: m.merge_request_count,
            repositories_contributed: m.repositories_contributed,
            followers_count: m.followers,
            calculation_timestamp: calculated_at,
        })
        .collect()
}

impl RankStage {
    pub fn new(ranking: Arc<dyn RankingRepository>, weights: RankWeights) -> Self {
        Self { ranking, weights }
    }
}

#[async_trait]
impl Stage for RankStage {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::AiAnalysis
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::default();
        ctx.check_cancelled()?;

        let metrics = self.ranking.collect_contributor_metrics().await?;
        report.items_seen = metrics.len() as u64;
        if metrics.is_empty() {
            info!("no rankable contributors, skipping snapshot");
            return Ok(report);
        }

        let calculated_at = Utc::now();
        let rows = build_snapshot(&metrics, &self.weights, calculated_at);

        ctx.check_cancelled()?;
        self.ranking.insert_snapshot(&rows, calculated_at).await?;
        report.items_succeeded = rows.len() as u64;
        info!(
            contributors = rows.len(),
            %calculated_at,
            "ranking snapshot written"
        );
        Ok(report)
    }
}
