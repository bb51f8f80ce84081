// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Contributor Entity
//!
//! A person (or bot) that authored, merged, or committed to something the
//! pipeline ingested. Unknown users become rows with a null username and
//! `is_placeholder = true` rather than rows carrying sentinel strings; the
//! enrichment key is the provider id, which makes null usernames safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::value_objects::entity_id::ContributorId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    // Identity fields
    pub uuid: ContributorId,
    pub provider_id: i64,
    /// Nullable on purpose: placeholders have no login, and logins can be
    /// renamed upstream. Enrichment reconciles it.
    pub username: Option<String>,

    // Profile fields (filled by enrichment)
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub twitter: Option<String>,
    pub location: Option<String>,
    pub followers: i64,
    pub public_repos: i64,

    // Derived analytics
    pub impact_score: f64,
    pub role_classification: Option<String>,
    pub top_languages: Vec<String>,
    pub organizations: Vec<String>,
    pub first_contribution: Option<DateTime<Utc>>,
    pub last_contribution: Option<DateTime<Utc>>,

    // Activity counters
    pub direct_commits: i64,
    pub pull_requests_merged: i64,
    pub pull_requests_rejected: i64,
    pub code_reviews: i64,

    // Flags and enrichment state
    pub is_enriched: bool,
    pub is_placeholder: bool,
    pub is_bot: bool,
    pub enrichment_attempts: i64,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contributor {
    /// Creates a contributor first seen in an activity event.
    ///
    /// `username` may be `None` (the provider resolved the id but not the
    /// login); `is_placeholder` marks sentinel or otherwise unresolvable
    /// identities that enrichment must skip.
    pub fn discovered(
        provider_id: i64,
        username: Option<String>,
        is_placeholder: bool,
        is_bot: bool,
    ) -> Result<Self, PipelineError> {
        if provider_id <= 0 {
            return Err(PipelineError::validation_error(format!(
                "contributor provider id must be positive, got {}",
                provider_id
            )));
        }

        let now = Utc::now();
        Ok(Contributor {
            uuid: ContributorId::new(),
            provider_id,
            username,
            name: None,
            avatar_url: None,
            bio: None,
            company: None,
            blog: None,
            twitter: None,
            location: None,
            followers: 0,
            public_repos: 0,
            impact_score: 0.0,
            role_classification: None,
            top_languages: Vec::new(),
            organizations: Vec::new(),
            first_contribution: None,
            last_contribution: None,
            direct_commits: 0,
            pull_requests_merged: 0,
            pull_requests_rejected: 0,
            code_reviews: 0,
            is_enriched: false,
            is_placeholder,
            is_bot,
            enrichment_attempts: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn mark_enriched(&mut self) {
        self.is_enriched = true;
        self.enrichment_attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn record_enrichment_failure(&mut self) {
        self.enrichment_attempts += 1;
        self.updated_at = Utc::now();
    }

    /// Placeholders are never enrichment candidates.
    pub fn needs_enrichment(&self, max_attempts: i64) -> bool {
        !self.is_placeholder && !self.is_enriched && self.enrichment_attempts < max_attempts
    }

    /// Reconciles the stored username after an enrichment fetch; the
    /// provider id wins over the login, which may have been renamed.
    pub fn reconcile_username(&mut self, current_login: Option<&str>) -> bool {
        let changed = self.username.as_deref() != current_login;
        if changed {
            self.username = current_login.map(str::to_string);
            self.updated_at = Utc::now();
        }
        changed
    }
}
