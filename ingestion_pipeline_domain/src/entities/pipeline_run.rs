// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Run Records
//!
//! The job store's three row families: schedules (when should a pipeline
//! run), status (is it running right now - exactly one row per type), and
//! history (append-only run log). Together they carry the singleton
//! invariant: at most one history row per type is in `running`, and the
//! status row's `is_running` is true iff such a row exists.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::pipeline_type::{PipelineType, RunStatus, TriggerKind};

/// A cron-driven execution plan for one pipeline type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSchedule {
    pub id: i64,
    pub pipeline_type: PipelineType,
    /// Cron expression (seconds-resolution, six fields)
    pub cron_expression: String,
    /// IANA timezone name the expression is evaluated in
    pub timezone: String,
    pub is_active: bool,
    /// Optional stage parameters (e.g. `process_all_items`)
    pub parameters: HashMap<String, serde_json::Value>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineSchedule {
    /// Whether the schedule is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && matches!(self.next_run_at, Some(next) if next <= now)
    }

    /// Reads the `process_all_items` parameter, defaulting to false.
    pub fn process_all_items(&self) -> bool {
        self.parameters
            .get("process_all_items")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Fields for creating a schedule; the store assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub pipeline_type: PipelineType,
    pub cron_expression: String,
    pub timezone: String,
    pub is_active: bool,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Partial schedule update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulePatch {
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
    pub parameters: Option<HashMap<String, serde_json::Value>>,
}

impl SchedulePatch {
    pub fn is_empty(&self) -> bool {
        self.cron_expression.is_none()
            && self.timezone.is_none()
            && self.is_active.is_none()
            && self.parameters.is_none()
    }
}

/// Live state of one pipeline type. Exactly one row per type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub pipeline_type: PipelineType,
    pub is_running: bool,
    pub status: String,
    pub last_run: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHistory {
    pub id: i64,
    pub pipeline_type: PipelineType,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_processed: i64,
    pub error_message: Option<String>,
}

impl PipelineHistory {
    /// Whether the run reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
