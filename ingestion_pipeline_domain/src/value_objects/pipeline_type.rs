// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Orchestration Vocabulary
//!
//! String-backed enums shared by the job store, the scheduler, the stages,
//! and the control plane: the pipeline type, how a run was triggered, and the
//! run status lifecycle. The wire spellings (`github_sync`, `scheduled`,
//! `running`, …) are part of the external contract and round-trip exactly.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The pipeline families the orchestrator knows about.
///
/// `AiAnalysis` is the wire name of the ranking pipeline;
/// `SitemapGeneration` is recognized for scheduling and history but executed
/// by an external collaborator, not this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    GithubSync,
    DataProcessing,
    DataEnrichment,
    AiAnalysis,
    SitemapGeneration,
}

impl PipelineType {
    /// All known pipeline types, in dispatch order
    pub const ALL: [PipelineType; 5] = [
        PipelineType::GithubSync,
        PipelineType::DataProcessing,
        PipelineType::DataEnrichment,
        PipelineType::AiAnalysis,
        PipelineType::SitemapGeneration,
    ];

    /// The wire spelling used by the control plane and the job store
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::GithubSync => "github_sync",
            PipelineType::DataProcessing => "data_processing",
            PipelineType::DataEnrichment => "data_enrichment",
            PipelineType::AiAnalysis => "ai_analysis",
            PipelineType::SitemapGeneration => "sitemap_generation",
        }
    }
}

impl Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github_sync" => Ok(PipelineType::GithubSync),
            "data_processing" => Ok(PipelineType::DataProcessing),
            "data_enrichment" => Ok(PipelineType::DataEnrichment),
            "ai_analysis" => Ok(PipelineType::AiAnalysis),
            "sitemap_generation" => Ok(PipelineType::SitemapGeneration),
            other => Err(PipelineError::validation_error(format!(
                "unknown pipeline type '{}'",
                other
            ))),
        }
    }
}

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Enqueued by the scheduler from a due cron expression
    Scheduled,
    /// Requested through the control plane or the CLI
    Direct,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Direct => "direct",
        }
    }
}

impl Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerKind::Scheduled),
            "direct" => Ok(TriggerKind::Direct),
            other => Err(PipelineError::validation_error(format!(
                "unknown trigger kind '{}'",
                other
            ))),
        }
    }
}

/// History row lifecycle: `running` then exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    /// Whether this status ends the run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(PipelineError::validation_error(format!(
                "unknown run status '{}'",
                other
            ))),
        }
    }
}
