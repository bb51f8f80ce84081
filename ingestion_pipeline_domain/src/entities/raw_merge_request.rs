// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Raw staging row between Sync and Process. Holds the opaque payload JSON;
//! `is_processed` transitions 0 → 1 at most once and gates selection, which
//! is what makes payload replays idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::value_objects::activity_payload::ActivityPayload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMergeRequest {
    pub id: i64,
    /// Opaque JSON text; decode with [`RawMergeRequest::decode`]
    pub payload: String,
    pub is_processed: bool,
    /// Failure tag set when Process marks a row processed without extracting
    /// entities from it
    pub process_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RawMergeRequest {
    /// Decodes the stored payload.
    pub fn decode(&self) -> Result<ActivityPayload, PipelineError> {
        ActivityPayload::from_json(&self.payload)
    }
}
