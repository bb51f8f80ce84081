// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Control Plane
//!
//! The JSON endpoints the orchestrator process mounts: pipeline
//! start/stop/restart, status and history, schedule CRUD with ad-hoc
//! trigger, liveness, and metrics. Every response carries `success` and a
//! human-readable `message`; provider credentials and internal stack detail
//! never leave the process.

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use ingestion_pipeline_domain::repositories::JobRepository;
use ingestion_pipeline_domain::services::provider_client::ProviderClient;

use crate::application::services::PipelineOrchestrator;
use crate::infrastructure::metrics::MetricsService;
use crate::infrastructure::repositories::SqliteStore;

pub mod handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub job: Arc<dyn JobRepository>,
    pub store: Arc<SqliteStore>,
    pub provider: Arc<dyn ProviderClient>,
    pub metrics: Arc<MetricsService>,
    pub started_at: Instant,
}

/// Builds the control-plane router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pipeline/start", post(handlers::start_pipeline))
        .route("/pipeline/stop", post(handlers::stop_pipeline))
        .route("/pipeline/restart", post(handlers::restart_pipeline))
        .route("/pipeline/status", get(handlers::pipeline_status))
        .route("/pipeline/history", get(handlers::pipeline_history))
        .route(
            "/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .route(
            "/schedules/{id}",
            axum::routing::patch(handlers::update_schedule).delete(handlers::delete_schedule),
        )
        .route("/schedules/{id}/trigger", post(handlers::trigger_schedule))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
