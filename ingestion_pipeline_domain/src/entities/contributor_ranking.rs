// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Contributor Ranking Snapshot
//!
//! One computed ranking row per contributor per snapshot. All rows of a
//! snapshot share a single `calculation_timestamp` and are inserted in one
//! transaction; the most recent timestamp is the snapshot downstream readers
//! consume. Rank positions form the contiguous range `1..=N` within a
//! snapshot, ties broken by provider id for determinism.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::value_objects::entity_id::{ContributorId, RankingId};

/// Raw per-contributor inputs to the ranking computation, rolled up from
/// non-fork repositories only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorMetrics {
    pub contributor_uuid: ContributorId,
    pub contributor_provider_id: i64,
    pub username: Option<String>,
    pub followers: i64,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub commit_count: i64,
    pub merge_request_count: i64,
    pub review_count: i64,
    pub repositories_contributed: i64,
    /// Count of filled profile fields (name, bio, company, blog, location,
    /// avatar), used for the profile-completeness dimension
    pub profile_fields_filled: i64,
}

/// The eight normalized dimension scores, each in [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub volume: f64,
    pub efficiency: f64,
    pub impact: f64,
    pub influence: f64,
    pub popularity: f64,
    pub followers: f64,
    pub profile_completeness: f64,
    pub collaboration: f64,
}

/// Weights combining the dimension scores into `total_score`. Loaded from
/// configuration (`RANK_WEIGHTS`, a JSON object of dimension name → weight);
/// unnamed dimensions keep their default weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankWeights {
    pub volume: f64,
    pub efficiency: f64,
    pub impact: f64,
    pub influence: f64,
    pub popularity: f64,
    pub followers: f64,
    pub profile_completeness: f64,
    pub collaboration: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        RankWeights {
            volume: 0.20,
            efficiency: 0.10,
            impact: 0.20,
            influence: 0.10,
            popularity: 0.10,
            followers: 0.10,
            profile_completeness: 0.05,
            collaboration: 0.15,
        }
    }
}

impl RankWeights {
    /// Parses the `RANK_WEIGHTS` configuration value. Unknown dimension
    /// names and negative weights are rejected; omitted dimensions keep
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let weights: RankWeights = serde_json::from_str(json).map_err(|e| {
            PipelineError::invalid_config(format!("invalid RANK_WEIGHTS: {}", e))
        })?;
        for (dimension, value) in [
            ("volume", weights.volume),
            ("efficiency", weights.efficiency),
            ("impact", weights.impact),
            ("influence", weights.influence),
            ("popularity", weights.popularity),
            ("followers", weights.followers),
            ("profile_completeness", weights.profile_completeness),
            ("collaboration", weights.collaboration),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::invalid_config(format!(
                    "RANK_WEIGHTS.{} must be a non-negative number, got {}",
                    dimension, value
                )));
            }
        }
        Ok(weights)
    }

    /// Combines dimension scores into the weighted total.
    pub fn total_score(&self, scores: &DimensionScores) -> f64 {
        self.volume * scores.volume
            + self.efficiency * scores.efficiency
            + self.impact * scores.impact
            + self.influence * scores.influence
            + self.popularity * scores.popularity
            + self.followers * scores.followers
            + self.profile_completeness * scores.profile_completeness
            + self.collaboration * scores.collaboration
    }
}

/// A single row of one ranking snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorRanking {
    pub uuid: RankingId,
    pub contributor_uuid: ContributorId,
    pub contributor_provider_id: i64,
    pub username: Option<String>,

    pub rank_position: i64,
    pub total_score: f64,

    // Per-dimension normalized scores, each in [0, 100]
    pub volume_score: f64,
    pub efficiency_score: f64,
    pub impact_score: f64,
    pub influence_score: f64,
    pub popularity_score: f64,
    pub followers_score: f64,
    pub profile_completeness_score: f64,
    pub collaboration_score: f64,

    // Raw counters the scores were derived from
    pub raw_lines_added: i64,
    pub raw_lines_removed: i64,
    pub raw_commits: i64,
    pub raw_merge_requests: i64,
    pub repositories_contributed: i64,
    pub followers_count: i64,

    /// Shared across every row of the snapshot
    pub calculation_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = RankWeights::default();
        let sum = w.volume
            + w.efficiency
            + w.impact
            + w.influence
            + w.popularity
            + w.followers
            + w.profile_completeness
            + w.collaboration;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_from_json_partial_override() {
        let w = RankWeights::from_json(r#"{"volume": 0.5, "impact": 0.5}"#).unwrap();
        assert_eq!(w.volume, 0.5);
        assert_eq!(w.impact, 0.5);
        // Omitted dimensions keep defaults
        assert_eq!(w.collaboration, RankWeights::default().collaboration);
    }

    #[test]
    fn test_weights_reject_unknown_dimension() {
        assert!(RankWeights::from_json(r#"{"charisma": 1.0}"#).is_err());
    }

    #[test]
    fn test_weights_reject_negative() {
        assert!(RankWeights::from_json(r#"{"volume": -0.1}"#).is_err());
    }

    #[test]
    fn test_total_score_is_weighted_sum() {
        let w = RankWeights::from_json(r#"{"volume": 1.0}"#).unwrap();
        let mut scores = DimensionScores::default();
        scores.volume = 80.0;
        scores.impact = 50.0;
        let expected = 1.0 * 80.0 + RankWeights::default().impact * 50.0;
        assert!((w.total_score(&scores) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_rows_share_timestamp() {
        let ts = Utc::now();
        let rows: Vec<ContributorRanking> = (1..=3)
            .map(|position| ContributorRanking {
                uuid: RankingId::new(),
                contributor_uuid: ContributorId::new(),
                contributor_provider_id: position,
                username: None,
                rank_position: position,
                total_score: 0.0,
                volume_score: 0.0,
                efficiency_score: 0.0,
                impact_score: 0.0,
                influence_score: 0.0,
                popularity_score: 0.0,
                followers_score: 0.0,
                profile_completeness_score: 0.0,
                collaboration_score: 0.0,
                raw_lines_added: 0,
                raw_lines_removed: 0,
                raw_commits: 0,
                raw_merge_requests: 0,
                repositories_contributed: 0,
                followers_count: 0,
                calculation_timestamp: ts,
            })
            .collect();

        assert!(rows.iter().all(|r| r.calculation_timestamp == ts));
        let positions: Vec<i64> = rows.iter().map(|r| r.rank_position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }
}
