// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Process-stage drain behavior against the real store: full drains mark
//! every raw row processed exactly once, rejects are tagged rather than
//! retried, and entity rows land under their natural keys.

use std::sync::Arc;

use ingestion_pipeline::application::stages::{ProcessStage, Stage, StageContext};
use ingestion_pipeline::infrastructure::repositories::{SqliteJobStore, SqliteStore};
use ingestion_pipeline_bootstrap::shutdown::CancellationToken;
use ingestion_pipeline_domain::repositories::{
    EntityRepository, JobRepository, RawActivityRepository,
};
use ingestion_pipeline_domain::value_objects::activity_payload::{
    ActivityPayload, CommitFacet, PullRequestFacet, RepositoryFacet, UserFacet,
};
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

fn widgets_payload(number: i64) -> String {
    ActivityPayload {
        repository: Some(RepositoryFacet {
            provider_id: 1001,
            full_name: "acme/widgets".into(),
            ..Default::default()
        }),
        pull_request: Some(PullRequestFacet {
            number,
            title: format!("PR {}", number),
            author: Some(UserFacet {
                provider_id: 7,
                login: Some("alice".into()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        commits: vec![CommitFacet {
            sha: format!("sha-{}", number),
            ..Default::default()
        }],
    }
    .to_json()
    .unwrap()
}

struct Fixture {
    store: Arc<SqliteStore>,
    stage: ProcessStage,
    ctx: StageContext,
}

async fn fixture() -> Fixture {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let job = Arc::new(SqliteJobStore::new(store.pool().clone()));
    let history_id = job
        .begin_run(PipelineType::DataProcessing, TriggerKind::Direct)
        .await
        .unwrap();
    let stage = ProcessStage::new(store.clone(), store.clone(), job, 100);
    let ctx = StageContext {
        cancel: CancellationToken::new(),
        history_id,
        process_all: false,
    };
    Fixture { store, stage, ctx }
}

#[tokio::test]
async fn full_drain_marks_every_row_processed_with_matching_entities() {
    let f = fixture().await;
    for number in 1..=5 {
        f.store
            .upsert_raw(900_000 + number, &widgets_payload(number))
            .await
            .unwrap();
    }

    let report = f.stage.execute(&f.ctx).await.unwrap();
    assert_eq!(report.items_seen, 5);
    assert_eq!(report.items_succeeded, 5);
    assert_eq!(f.store.count_unprocessed().await.unwrap(), 0);

    // Each staged PR corresponds to exactly one merge request row under
    // its natural key
    let repo = f
        .store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .unwrap();
    for number in 1..=5 {
        let mr = f
            .store
            .find_merge_request(repo.uuid, number)
            .await
            .unwrap();
        assert!(mr.is_some(), "PR {} should have one merge request row", number);
    }
    let counts = f.store.entity_counts().await.unwrap();
    assert_eq!(counts.merge_requests, 5);
    assert_eq!(counts.commits, 5);
    assert_eq!(counts.contributors, 1);
}

#[tokio::test]
async fn rerun_after_drain_is_a_no_op() {
    let f = fixture().await;
    f.store.upsert_raw(900_001, &widgets_payload(1)).await.unwrap();

    let first = f.stage.execute(&f.ctx).await.unwrap();
    assert_eq!(first.items_succeeded, 1);

    let second = f.stage.execute(&f.ctx).await.unwrap();
    assert_eq!(second.items_seen, 0);
    assert_eq!(second.items_succeeded, 0);
    assert_eq!(f.store.entity_counts().await.unwrap().merge_requests, 1);
}

#[tokio::test]
async fn undecodable_payload_is_tagged_not_retried() {
    let f = fixture().await;
    f.store.upsert_raw(900_001, "{broken json").await.unwrap();
    f.store.upsert_raw(900_002, &widgets_payload(2)).await.unwrap();

    let report = f.stage.execute(&f.ctx).await.unwrap();
    assert_eq!(report.items_failed, 1);
    assert_eq!(report.items_succeeded, 1);

    // The broken row is processed (with a tag), not left to clog the queue
    assert_eq!(f.store.count_unprocessed().await.unwrap(), 0);
    let rows = f.store.unprocessed(10).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn payload_missing_facets_is_rejected_without_crash() {
    let f = fixture().await;
    // No repository facet
    f.store
        .upsert_raw(900_001, r#"{"pull_request": {"number": 42}}"#)
        .await
        .unwrap();
    // No pull request facet
    f.store
        .upsert_raw(
            900_002,
            r#"{"repository": {"provider_id": 1001, "full_name": "acme/widgets"}}"#,
        )
        .await
        .unwrap();

    let report = f.stage.execute(&f.ctx).await.unwrap();
    assert_eq!(report.items_failed, 2);
    assert_eq!(report.items_succeeded, 0);
    assert_eq!(f.store.count_unprocessed().await.unwrap(), 0);
    assert_eq!(f.store.entity_counts().await.unwrap().merge_requests, 0);
}

#[tokio::test]
async fn cancellation_stops_the_drain_cleanly() {
    let f = fixture().await;
    for number in 1..=3 {
        f.store
            .upsert_raw(900_000 + number, &widgets_payload(number))
            .await
            .unwrap();
    }
    f.ctx.cancel.cancel();

    let err = f.stage.execute(&f.ctx).await.unwrap_err();
    assert_eq!(err.category(), "cancellation");
    // Nothing half-done: rows are either fully processed or untouched
    assert_eq!(f.store.count_unprocessed().await.unwrap(), 3);
}
