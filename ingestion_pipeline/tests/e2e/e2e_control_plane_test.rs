// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Control-plane acceptance: concurrent starts race to one 200 and one
//! 409, unknown pipeline types are 400, and the read endpoints answer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use crate::common::{harness, TestHarness};

use ingestion_pipeline::presentation::http::{router, AppState};
use ingestion_pipeline_domain::repositories::JobRepository;
use ingestion_pipeline_domain::services::provider_client::ProviderClient;

fn app(h: &TestHarness) -> axum::Router {
    let job: Arc<dyn JobRepository> = h.job.clone();
    let provider: Arc<dyn ProviderClient> = h.provider.clone();
    router(AppState {
        orchestrator: h.orchestrator.clone(),
        job,
        store: h.store.clone(),
        provider,
        metrics: h.metrics.clone(),
        started_at: Instant::now(),
    })
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn concurrent_starts_one_wins_one_conflicts() {
    let h = harness().await;
    // Keep the first run alive long enough for the second request to race
    *h.provider.list_delay.lock() = Some(Duration::from_millis(500));

    let app = app(&h);
    let request_body = r#"{"pipeline_type": "github_sync"}"#;
    let (first, second) = tokio::join!(
        app.clone().oneshot(post_json("/pipeline/start", request_body)),
        async {
            // A hair later so the winner is deterministic
            tokio::time::sleep(Duration::from_millis(50)).await;
            app.clone().oneshot(post_json("/pipeline/start", request_body)).await
        },
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let winner = body_json(first).await;
    assert_eq!(winner["success"], Value::Bool(true));
    assert!(winner["history_id"].is_i64());

    let loser = body_json(second).await;
    assert_eq!(loser["success"], Value::Bool(false));
    assert!(loser["message"]
        .as_str()
        .unwrap()
        .contains("already running"));
}

#[tokio::test]
async fn unknown_pipeline_type_is_a_400() {
    let h = harness().await;
    let app = app(&h);

    let response = app
        .oneshot(post_json(
            "/pipeline/start",
            r#"{"pipeline_type": "full_backfill"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], Value::Bool(false));
}

#[tokio::test]
async fn sitemap_generation_is_recognized_but_not_executable_here() {
    let h = harness().await;
    let app = app(&h);

    let response = app
        .oneshot(post_json(
            "/pipeline/start",
            r#"{"pipeline_type": "sitemap_generation"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("no registered stage"));
}

#[tokio::test]
async fn direct_execution_returns_items_processed() {
    let h = harness().await;
    // Empty event feed: the run completes with zero items
    let app = app(&h);

    let response = app
        .oneshot(post_json(
            "/pipeline/start",
            r#"{"pipeline_type": "github_sync", "direct_execution": true}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], Value::Bool(true));
    assert_eq!(body["items_processed"], Value::from(0));
}

#[tokio::test]
async fn status_and_history_endpoints_answer() {
    let h = harness().await;
    let app = app(&h);

    // One finished run to look at
    app.clone()
        .oneshot(post_json(
            "/pipeline/start",
            r#"{"pipeline_type": "github_sync", "direct_execution": true}"#,
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/pipeline/status?pipeline_type=github_sync"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"]["pipeline_type"], Value::from("github_sync"));
    assert_eq!(body["status"]["is_running"], Value::Bool(false));

    let response = app
        .clone()
        .oneshot(get("/pipeline/history?pipeline_type=github_sync&limit=5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["status"], Value::from("completed"));
    assert_eq!(history[0]["trigger"], Value::from("direct"));

    // All statuses when no filter is given
    let response = app.oneshot(get("/pipeline/status")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["statuses"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn schedule_crud_round_trip() {
    let h = harness().await;
    let app = app(&h);

    // Seeded defaults are present
    let response = app.clone().oneshot(get("/schedules")).await.unwrap();
    let body = body_json(response).await;
    let seeded = body["schedules"].as_array().unwrap().len();
    assert_eq!(seeded, 5);

    // Creating a second schedule for a seeded type conflicts
    let response = app
        .clone()
        .oneshot(post_json(
            "/schedules",
            r#"{"pipeline_type": "github_sync", "cron_expression": "0 */10 * * * *"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Patch a seeded schedule active
    let schedules = h.job.list_schedules().await.unwrap();
    let sync_schedule = schedules
        .iter()
        .find(|s| s.pipeline_type.as_str() == "github_sync")
        .unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/schedules/{}", sync_schedule.id))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"is_active": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["schedule"]["is_active"], Value::Bool(true));

    // Ad-hoc trigger dispatches a run
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/schedules/{}/trigger", sync_schedule.id),
            "{}",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Delete, then 404 on the second attempt
    let delete = |id: i64| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/schedules/{}", id))
            .body(Body::empty())
            .unwrap()
    };
    let response = app.clone().oneshot(delete(sync_schedule.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.oneshot(delete(sync_schedule.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_store_and_uptime() {
    let h = harness().await;
    let app = app(&h);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], Value::Bool(true));
    assert_eq!(body["database"], Value::Bool(true));
    assert!(body["uptime_seconds"].is_u64() || body["uptime_seconds"].is_i64());
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let h = harness().await;
    let app = app(&h);

    // A run so the counters are non-empty
    app.clone()
        .oneshot(post_json(
            "/pipeline/start",
            r#"{"pipeline_type": "github_sync", "direct_execution": true}"#,
        ))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("pipeline_runs_started_total"));
}

#[tokio::test]
async fn stop_without_running_instance_is_a_404() {
    let h = harness().await;
    let app = app(&h);

    let response = app
        .oneshot(post_json(
            "/pipeline/stop",
            r#"{"pipeline_type": "github_sync"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], Value::Bool(false));
}

#[tokio::test]
async fn stop_cancels_a_running_pipeline() {
    let h = harness().await;
    *h.provider.list_delay.lock() = Some(Duration::from_secs(1));
    let app = app(&h);

    let started = app
        .clone()
        .oneshot(post_json(
            "/pipeline/start",
            r#"{"pipeline_type": "github_sync"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(started.status(), StatusCode::OK);
    let history_id = body_json(started).await["history_id"].as_i64().unwrap();

    let response = app
        .oneshot(post_json(
            "/pipeline/stop",
            r#"{"pipeline_type": "github_sync"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The stage winds down and closes the run as stopped
    let mut status = None;
    for _ in 0..50 {
        let run = h.job.find_history(history_id).await.unwrap().unwrap();
        if run.is_finished() {
            status = Some(run.status);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(status.map(|s| s.as_str()), Some("stopped"));
}
