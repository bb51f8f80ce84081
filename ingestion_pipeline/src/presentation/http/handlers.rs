// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Control-plane request handlers. Error-to-status mapping: unknown
//! pipeline types and invalid input are 400, already-running conflicts are
//! 409, missing resources are 404, everything else is 500.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use ingestion_pipeline_domain::entities::{NewSchedule, SchedulePatch};
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{EntityRepository, JobRepository};
use ingestion_pipeline_domain::services::provider_client::ProviderClient;
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

use crate::application::services::StartOutcome;

use super::AppState;

fn error_status(e: &PipelineError) -> StatusCode {
    match e {
        PipelineError::AlreadyRunning(_) => StatusCode::CONFLICT,
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::ValidationError(_) | PipelineError::InvalidConfiguration(_) => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::RateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &PipelineError) -> (StatusCode, Json<Value>) {
    (
        error_status(e),
        Json(json!({
            "success": false,
            "message": e.to_string(),
        })),
    )
}

fn parse_pipeline_type(raw: &str) -> Result<PipelineType, (StatusCode, Json<Value>)> {
    raw.parse::<PipelineType>().map_err(|e| error_response(&e))
}

// ----- pipeline control -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub pipeline_type: String,
    #[serde(default)]
    pub direct_execution: bool,
    #[serde(default)]
    pub process_all_items: bool,
}

pub async fn start_pipeline(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> impl IntoResponse {
    let pipeline = match parse_pipeline_type(&request.pipeline_type) {
        Ok(pipeline) => pipeline,
        Err(response) => return response,
    };

    match state
        .orchestrator
        .start(
            pipeline,
            TriggerKind::Direct,
            request.process_all_items,
            request.direct_execution,
        )
        .await
    {
        Ok(StartOutcome::Completed { history_id, report }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("pipeline '{}' completed", pipeline),
                "history_id": history_id,
                "items_processed": report.items_processed(),
                "items_failed": report.items_failed,
                "rate_limit_hit": report.rate_limit_hit,
            })),
        ),
        Ok(StartOutcome::Started { history_id }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("pipeline '{}' started", pipeline),
                "history_id": history_id,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub pipeline_type: String,
    pub history_id: Option<i64>,
}

pub async fn stop_pipeline(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> impl IntoResponse {
    let pipeline = match parse_pipeline_type(&request.pipeline_type) {
        Ok(pipeline) => pipeline,
        Err(response) => return response,
    };

    if state.orchestrator.stop(pipeline, request.history_id) {
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("pipeline '{}' stopping", pipeline),
            })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": format!("pipeline '{}' has no matching running instance", pipeline),
            })),
        )
    }
}

pub async fn restart_pipeline(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> impl IntoResponse {
    let pipeline = match parse_pipeline_type(&request.pipeline_type) {
        Ok(pipeline) => pipeline,
        Err(response) => return response,
    };

    match state
        .orchestrator
        .restart(
            pipeline,
            TriggerKind::Direct,
            request.process_all_items,
            request.direct_execution,
        )
        .await
    {
        Ok(StartOutcome::Completed { history_id, report }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("pipeline '{}' restarted and completed", pipeline),
                "history_id": history_id,
                "items_processed": report.items_processed(),
            })),
        ),
        Ok(StartOutcome::Started { history_id }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("pipeline '{}' restarted", pipeline),
                "history_id": history_id,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

// ----- status and history -----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub pipeline_type: Option<String>,
}

pub async fn pipeline_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    match query.pipeline_type.as_deref() {
        Some(raw) => {
            let pipeline = match parse_pipeline_type(raw) {
                Ok(pipeline) => pipeline,
                Err(response) => return response,
            };
            match state.job.status(pipeline).await {
                Ok(status) => (
                    StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "message": "ok",
                        "status": status,
                    })),
                ),
                Err(e) => error_response(&e),
            }
        }
        None => match state.job.all_statuses().await {
            Ok(statuses) => (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "ok",
                    "statuses": statuses,
                })),
            ),
            Err(e) => error_response(&e),
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub pipeline_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn pipeline_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let pipeline = match query.pipeline_type.as_deref() {
        Some(raw) => match parse_pipeline_type(raw) {
            Ok(pipeline) => Some(pipeline),
            Err(response) => return response,
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(20).min(100);
    let offset = query.offset.unwrap_or(0);

    match state.job.history(pipeline, limit, offset).await {
        Ok(history) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "ok",
                "history": history,
                "limit": limit,
                "offset": offset,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

// ----- schedules --------------------------------------------------------------

pub async fn list_schedules(State(state): State<AppState>) -> impl IntoResponse {
    match state.job.list_schedules().await {
        Ok(schedules) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "ok",
                "schedules": schedules,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub pipeline_type: String,
    pub cron_expression: String,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
    pub parameters: Option<HashMap<String, Value>>,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> impl IntoResponse {
    let pipeline = match parse_pipeline_type(&request.pipeline_type) {
        Ok(pipeline) => pipeline,
        Err(response) => return response,
    };

    let new_schedule = NewSchedule {
        pipeline_type: pipeline,
        cron_expression: request.cron_expression,
        timezone: request.timezone.unwrap_or_else(|| "UTC".to_string()),
        is_active: request.is_active.unwrap_or(false),
        parameters: request.parameters.unwrap_or_default(),
    };

    match state.job.create_schedule(&new_schedule).await {
        Ok(schedule) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "schedule created",
                "schedule": schedule,
            })),
        ),
        Err(e @ PipelineError::IntegrityViolation(_)) => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "message": format!("a schedule for '{}' already exists: {}", pipeline, e),
            })),
        ),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
    pub parameters: Option<HashMap<String, Value>>,
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateScheduleRequest>,
) -> impl IntoResponse {
    let patch = SchedulePatch {
        cron_expression: request.cron_expression,
        timezone: request.timezone,
        is_active: request.is_active,
        parameters: request.parameters,
    };
    if patch.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": "empty schedule patch",
            })),
        );
    }

    match state.job.update_schedule(id, &patch).await {
        Ok(schedule) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "schedule updated",
                "schedule": schedule,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.job.delete_schedule(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "schedule deleted",
            })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": format!("schedule {} not found", id),
            })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn trigger_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let schedule = match state.job.find_schedule(id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "success": false,
                    "message": format!("schedule {} not found", id),
                })),
            );
        }
        Err(e) => return error_response(&e),
    };

    match state
        .orchestrator
        .start(
            schedule.pipeline_type,
            TriggerKind::Direct,
            schedule.process_all_items(),
            false,
        )
        .await
    {
        Ok(StartOutcome::Started { history_id }) | Ok(StartOutcome::Completed { history_id, .. }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("pipeline '{}' triggered", schedule.pipeline_type),
                "history_id": history_id,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

// ----- health and metrics -----------------------------------------------------

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.store.pool())
        .await
        .is_ok();

    let counts = state.store.entity_counts().await.ok();
    let rate_limit = state.provider.rate_limit();
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "success": database_ok,
            "message": if database_ok { "ok" } else { "store unavailable" },
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "database": database_ok,
            "rate_limit": rate_limit,
            "entities": counts,
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(remaining) = state.provider.rate_limit().remaining {
        state.metrics.set_rate_limit_remaining(remaining);
    }
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics unavailable: {}", e),
        )
            .into_response(),
    }
}
