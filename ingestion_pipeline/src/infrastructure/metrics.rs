// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prometheus metrics for the orchestrator: per-pipeline run and item
//! counters plus the provider rate-limit gauge, exposed by the control
//! plane at `GET /metrics`.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::RunOutcome;
use ingestion_pipeline_domain::value_objects::pipeline_type::PipelineType;

/// Registry plus the handful of instruments the pipeline maintains.
pub struct MetricsService {
    registry: Registry,
    runs_started: IntCounterVec,
    runs_finished: IntCounterVec,
    items_processed: IntCounterVec,
    rate_limit_remaining: IntGauge,
}

impl MetricsService {
    pub fn new() -> Result<Self, PipelineError> {
        let registry = Registry::new();

        let runs_started = IntCounterVec::new(
            Opts::new("pipeline_runs_started_total", "Pipeline runs started"),
            &["pipeline"],
        )
        .map_err(|e| PipelineError::internal_error(format!("metrics init: {}", e)))?;
        let runs_finished = IntCounterVec::new(
            Opts::new("pipeline_runs_finished_total", "Pipeline runs finished"),
            &["pipeline", "outcome"],
        )
        .map_err(|e| PipelineError::internal_error(format!("metrics init: {}", e)))?;
        let items_processed = IntCounterVec::new(
            Opts::new("pipeline_items_processed_total", "Items processed per pipeline"),
            &["pipeline"],
        )
        .map_err(|e| PipelineError::internal_error(format!("metrics init: {}", e)))?;
        let rate_limit_remaining = IntGauge::new(
            "provider_rate_limit_remaining",
            "Provider-reported remaining request quota",
        )
        .map_err(|e| PipelineError::internal_error(format!("metrics init: {}", e)))?;

        for metric in [&runs_started, &runs_finished, &items_processed] {
            registry
                .register(Box::new(metric.clone()))
                .map_err(|e| PipelineError::internal_error(format!("metrics register: {}", e)))?;
        }
        registry
            .register(Box::new(rate_limit_remaining.clone()))
            .map_err(|e| PipelineError::internal_error(format!("metrics register: {}", e)))?;

        Ok(Self {
            registry,
            runs_started,
            runs_finished,
            items_processed,
            rate_limit_remaining,
        })
    }

    pub fn record_run_started(&self, pipeline: PipelineType) {
        self.runs_started
            .with_label_values(&[pipeline.as_str()])
            .inc();
    }

    pub fn record_run_finished(&self, pipeline: PipelineType, outcome: RunOutcome, items: i64) {
        let outcome_label = outcome.as_run_status().as_str();
        self.runs_finished
            .with_label_values(&[pipeline.as_str(), outcome_label])
            .inc();
        if items > 0 {
            self.items_processed
                .with_label_values(&[pipeline.as_str()])
                .inc_by(items as u64);
        }
    }

    pub fn set_rate_limit_remaining(&self, remaining: i64) {
        self.rate_limit_remaining.set(remaining);
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, PipelineError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| PipelineError::internal_error(format!("metrics encode: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| PipelineError::internal_error(format!("metrics encode: {}", e)))
    }
}
