// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Repository Entity
//!
//! A repository on the external code-hosting provider, as the pipeline knows
//! it. Born during Process from a staged activity payload with the facts the
//! event carried; filled in later by the Enrich stage from the provider's
//! repository detail endpoint.
//!
//! ## Identity
//!
//! - `uuid` - stable application identifier, never changes after birth
//! - `provider_id` - the provider's numeric id, unique across repositories
//! - `full_name` - `owner/name`, unique, the human-facing natural key
//!
//! ## Enrichment lifecycle
//!
//! `is_enriched` moves `false → true` exactly once; `enrichment_attempts`
//! only ever increments. Both rules are enforced by the transition methods
//! below and mirrored by the store's update statements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::value_objects::entity_id::{ContributorId, RepositoryId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    // Identity fields (always first)
    pub uuid: RepositoryId,
    pub provider_id: i64,
    pub full_name: String,
    pub name: String,

    // Core business fields
    pub url: Option<String>,
    pub description: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub size_kb: i64,
    pub primary_language: Option<String>,
    pub default_branch: Option<String>,
    pub is_fork: bool,
    pub is_archived: bool,

    // Enrichment state
    pub is_enriched: bool,
    pub enrichment_attempts: i64,

    // Owner dual reference; both halves present or both absent
    pub owner_uuid: Option<ContributorId>,
    pub owner_provider_id: Option<i64>,

    // Metadata fields (always last)
    pub last_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// Creates a repository discovered in an activity event.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - if the provider id is not positive or the full
    ///   name is not of the form `owner/name`
    pub fn discovered(provider_id: i64, full_name: impl Into<String>) -> Result<Self, PipelineError> {
        let full_name = full_name.into();
        if provider_id <= 0 {
            return Err(PipelineError::validation_error(format!(
                "repository provider id must be positive, got {}",
                provider_id
            )));
        }
        let name = match full_name.rsplit_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => name.to_string(),
            _ => {
                return Err(PipelineError::validation_error(format!(
                    "repository full name '{}' is not of the form owner/name",
                    full_name
                )));
            }
        };

        let now = Utc::now();
        Ok(Repository {
            uuid: RepositoryId::new(),
            provider_id,
            full_name,
            name,
            url: None,
            description: None,
            stars: 0,
            forks: 0,
            watchers: 0,
            open_issues: 0,
            size_kb: 0,
            primary_language: None,
            default_branch: None,
            is_fork: false,
            is_archived: false,
            is_enriched: false,
            enrichment_attempts: 0,
            owner_uuid: None,
            owner_provider_id: None,
            last_updated: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Records a successful enrichment: flips the flag and counts the attempt.
    pub fn mark_enriched(&mut self) {
        self.is_enriched = true;
        self.enrichment_attempts += 1;
        self.updated_at = Utc::now();
    }

    /// Records a failed enrichment attempt without flipping the flag.
    pub fn record_enrichment_failure(&mut self) {
        self.enrichment_attempts += 1;
        self.updated_at = Utc::now();
    }

    /// Sets both halves of the owner reference together.
    pub fn set_owner(&mut self, owner_uuid: ContributorId, owner_provider_id: i64) {
        self.owner_uuid = Some(owner_uuid);
        self.owner_provider_id = Some(owner_provider_id);
        self.updated_at = Utc::now();
    }

    /// Whether this repository is still an enrichment candidate.
    pub fn needs_enrichment(&self, max_attempts: i64) -> bool {
        !self.is_enriched && self.enrichment_attempts < max_attempts
    }
}
