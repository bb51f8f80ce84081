// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! The at-most-one-run-per-type invariant under concurrent starts, and
//! the status/history mirror it implies.

use std::sync::Arc;

use ingestion_pipeline::infrastructure::repositories::{schema, SqliteJobStore};
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{JobRepository, RunOutcome};
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

async fn job_store() -> Arc<SqliteJobStore> {
    let pool = schema::in_memory_pool().await.unwrap();
    Arc::new(SqliteJobStore::new(pool))
}

/// Counts history rows in `running` for one type.
async fn running_rows(store: &SqliteJobStore, pipeline: PipelineType) -> usize {
    store
        .history(Some(pipeline), 100, 0)
        .await
        .unwrap()
        .iter()
        .filter(|run| run.status.as_str() == "running")
        .count()
}

#[tokio::test]
async fn concurrent_starts_yield_exactly_one_winner() {
    let store = job_store().await;

    let (a, b) = tokio::join!(
        store.begin_run(PipelineType::GithubSync, TriggerKind::Direct),
        store.begin_run(PipelineType::GithubSync, TriggerKind::Direct),
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one start may win the race");
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(PipelineError::AlreadyRunning(_))));

    assert_eq!(running_rows(&store, PipelineType::GithubSync).await, 1);
    assert!(store.status(PipelineType::GithubSync).await.unwrap().is_running);
}

#[tokio::test]
async fn status_running_iff_a_running_history_row_exists() {
    let store = job_store().await;

    for pipeline in PipelineType::ALL {
        // Nothing running yet
        let status = store.status(pipeline).await.unwrap();
        assert!(!status.is_running);
        assert_eq!(running_rows(&store, pipeline).await, 0);

        let history_id = store.begin_run(pipeline, TriggerKind::Scheduled).await.unwrap();
        assert!(store.status(pipeline).await.unwrap().is_running);
        assert_eq!(running_rows(&store, pipeline).await, 1);

        store
            .end_run(history_id, RunOutcome::Completed, 1, None)
            .await
            .unwrap();
        assert!(!store.status(pipeline).await.unwrap().is_running);
        assert_eq!(running_rows(&store, pipeline).await, 0);
    }
}

#[tokio::test]
async fn distinct_types_run_in_parallel() {
    let store = job_store().await;

    let sync = store
        .begin_run(PipelineType::GithubSync, TriggerKind::Direct)
        .await
        .unwrap();
    let enrich = store
        .begin_run(PipelineType::DataEnrichment, TriggerKind::Direct)
        .await
        .unwrap();
    assert_ne!(sync, enrich);

    assert!(store.status(PipelineType::GithubSync).await.unwrap().is_running);
    assert!(store.status(PipelineType::DataEnrichment).await.unwrap().is_running);

    // Enrichment finishing does not release the sync slot
    store
        .end_run(enrich, RunOutcome::Completed, 0, None)
        .await
        .unwrap();
    let second_sync = store
        .begin_run(PipelineType::GithubSync, TriggerKind::Direct)
        .await;
    assert!(matches!(second_sync, Err(PipelineError::AlreadyRunning(_))));
}

#[tokio::test]
async fn lifecycle_storm_never_exceeds_one_running_row() {
    let store = job_store().await;
    let pipeline = PipelineType::DataProcessing;

    for round in 0..10 {
        let started = store.begin_run(pipeline, TriggerKind::Direct).await.unwrap();
        // A competing start loses while the slot is held
        assert!(store.begin_run(pipeline, TriggerKind::Scheduled).await.is_err());
        assert!(running_rows(&store, pipeline).await <= 1);

        let outcome = match round % 3 {
            0 => RunOutcome::Completed,
            1 => RunOutcome::Failed,
            _ => RunOutcome::Stopped,
        };
        store.end_run(started, outcome, round, None).await.unwrap();
        assert_eq!(running_rows(&store, pipeline).await, 0);
    }

    let history = store.history(Some(pipeline), 100, 0).await.unwrap();
    assert_eq!(history.len(), 10);
    assert!(history.iter().all(|run| run.is_finished()));
}

#[tokio::test]
async fn repair_then_start_succeeds() {
    let store = job_store().await;
    store
        .begin_run(PipelineType::AiAnalysis, TriggerKind::Scheduled)
        .await
        .unwrap();

    // Crash: the slot is stuck until the repair sweep runs
    assert!(store
        .begin_run(PipelineType::AiAnalysis, TriggerKind::Direct)
        .await
        .is_err());
    assert_eq!(store.repair_dangling_runs().await.unwrap(), 1);
    store
        .begin_run(PipelineType::AiAnalysis, TriggerKind::Direct)
        .await
        .unwrap();
}
