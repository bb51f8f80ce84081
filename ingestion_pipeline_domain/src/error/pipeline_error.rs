// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the error system shared by every layer of the
//! ingestion pipeline. It categorizes the failure kinds the pipeline core has
//! to distinguish (transient provider faults, rate limiting, not-found,
//! contention, integrity violations, cancellation) so stage code can route
//! each one to the policy the orchestration rules require.
//!
//! ## Error Categories
//!
//! - **Configuration** - malformed or missing configuration
//!   (`InvalidConfiguration`, `ValidationError`)
//! - **Provider** - failures talking to the external code-hosting API
//!   (`ProviderTransient`, `RateLimited`, `NotFound`)
//! - **Persistence** - embedded store failures (`DatabaseError`,
//!   `DatabaseBusy`, `IntegrityViolation`, `SerializationError`)
//! - **Orchestration** - pipeline lifecycle conflicts (`AlreadyRunning`,
//!   `Cancelled`, `TimeoutError`)
//! - **System** - anything unexpected (`InternalError`, `IoError`)
//!
//! ## Recovery
//!
//! Some variants indicate retry-able conditions; `is_recoverable()` encodes
//! which. `RateLimited` carries the provider-reported reset time so callers
//! can sleep exactly as long as needed instead of guessing.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Domain-specific errors for the ingestion pipeline.
///
/// Each variant represents a distinct failure mode with enough context for
/// the caller to decide between retrying, counting a per-item failure, or
/// aborting the run.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Provider error: {0}")]
    ProviderTransient(String),

    #[error("Rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database busy: {0}")]
    DatabaseBusy(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Pipeline already running: {0}")]
    AlreadyRunning(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new validation error
    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Creates a new transient provider error
    pub fn provider_transient(msg: impl Into<String>) -> Self {
        Self::ProviderTransient(msg.into())
    }

    /// Creates a rate-limit error carrying the provider-reported reset time
    pub fn rate_limited(reset_at: DateTime<Utc>) -> Self {
        Self::RateLimited { reset_at }
    }

    /// Creates a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a new database error
    pub fn database_error(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }

    /// Creates a new integrity violation error
    pub fn integrity_violation(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }

    /// Creates an already-running conflict for the given pipeline type
    pub fn already_running(pipeline: impl Into<String>) -> Self {
        Self::AlreadyRunning(pipeline.into())
    }

    /// Creates a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks if the error indicates a retry-able condition
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ProviderTransient(_)
                | PipelineError::RateLimited { .. }
                | PipelineError::DatabaseBusy(_)
                | PipelineError::TimeoutError(_)
                | PipelineError::IoError(_)
        )
    }

    /// Gets the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfiguration(_) => "configuration",
            PipelineError::ValidationError(_) => "validation",
            PipelineError::ProviderTransient(_) => "provider",
            PipelineError::RateLimited { .. } => "rate_limit",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::DatabaseError(_) => "database",
            PipelineError::DatabaseBusy(_) => "database",
            PipelineError::IntegrityViolation(_) => "integrity",
            PipelineError::SerializationError(_) => "serialization",
            PipelineError::AlreadyRunning(_) => "orchestration",
            PipelineError::Cancelled(_) => "cancellation",
            PipelineError::TimeoutError(_) => "timeout",
            PipelineError::IoError(_) => "io",
            PipelineError::InternalError(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}
