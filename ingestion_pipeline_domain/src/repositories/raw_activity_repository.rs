// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Staging-table port. Sync writes payloads keyed by the embedded PR id;
//! Process drains them oldest first. Marking processed is idempotent:
//! already-true rows are a no-op.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::RawMergeRequest;
use crate::error::PipelineError;

/// Outcome of staging one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawUpsertOutcome {
    /// A new row was inserted with `is_processed = 0`
    Inserted(i64),
    /// An existing row for the same PR id had its payload replaced
    Updated(i64),
}

impl RawUpsertOutcome {
    pub fn raw_id(&self) -> i64 {
        match self {
            RawUpsertOutcome::Inserted(id) | RawUpsertOutcome::Updated(id) => *id,
        }
    }
}

#[async_trait]
pub trait RawActivityRepository: Send + Sync {
    /// Stages one payload, keyed by the pull request's provider id: update
    /// the payload if a row for that PR already exists, insert otherwise.
    async fn upsert_raw(
        &self,
        pull_request_provider_id: i64,
        payload_json: &str,
    ) -> Result<RawUpsertOutcome, PipelineError>;

    /// Up to `limit` unprocessed rows, oldest first.
    async fn unprocessed(&self, limit: u32) -> Result<Vec<RawMergeRequest>, PipelineError>;

    /// Batched, idempotent processed-flag update. Returns rows changed.
    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, PipelineError>;

    /// Marks one row processed with a failure tag (payload could not yield
    /// entities but should not clog the queue).
    async fn mark_processed_with_error(
        &self,
        id: i64,
        reason: &str,
    ) -> Result<(), PipelineError>;

    async fn count_unprocessed(&self) -> Result<u64, PipelineError>;

    async fn count_all(&self) -> Result<u64, PipelineError>;
}
