// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Cold start, replay, and missing-author acceptance scenarios: Sync then
//! Process against a scripted provider, asserting the relational outcome.

use crate::common::{harness, merged_pr_event, provider_commit, user_summary};

use ingestion_pipeline::application::services::StartOutcome;
use ingestion_pipeline_domain::repositories::{EntityRepository, RawActivityRepository};
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

async fn run_to_completion(
    h: &crate::common::TestHarness,
    pipeline: PipelineType,
) -> ingestion_pipeline::application::stages::StageReport {
    match h
        .orchestrator
        .start(pipeline, TriggerKind::Direct, false, true)
        .await
        .expect("run should start")
    {
        StartOutcome::Completed { report, .. } => report,
        StartOutcome::Started { .. } => panic!("synchronous run reported as started"),
    }
}

#[tokio::test]
async fn cold_start_one_pr_extracts_the_full_graph() {
    let h = harness().await;
    h.provider.set_events(vec![merged_pr_event(
        1001,
        "acme/widgets",
        42,
        900042,
        Some(user_summary(7, "alice")),
    )]);
    h.provider.set_pr_commits(
        42,
        vec![
            provider_commit("aaa", Some(user_summary(7, "alice"))),
            provider_commit("bbb", Some(user_summary(7, "alice"))),
        ],
    );

    let sync = run_to_completion(&h, PipelineType::GithubSync).await;
    assert_eq!(sync.items_succeeded, 1);
    assert_eq!(h.store.count_all().await.unwrap(), 1);

    let process = run_to_completion(&h, PipelineType::DataProcessing).await;
    assert_eq!(process.items_succeeded, 1);

    let repo = h
        .store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .expect("repository row");
    assert_eq!(repo.full_name, "acme/widgets");

    let alice = h
        .store
        .find_contributor_by_provider_id(7)
        .await
        .unwrap()
        .expect("contributor row");
    assert_eq!(alice.username.as_deref(), Some("alice"));

    let mr = h
        .store
        .find_merge_request(repo.uuid, 42)
        .await
        .unwrap()
        .expect("merge request row");
    assert_eq!(mr.repository_provider_id, 1001);
    assert_eq!(mr.author_provider_id, Some(7));

    let commits = h.store.commits_for_merge_request(mr.uuid).await.unwrap();
    assert_eq!(commits.len(), 2);

    let link = h
        .store
        .find_contributor_repository(alice.uuid, repo.uuid)
        .await
        .unwrap()
        .expect("junction row");
    assert_eq!(link.pull_requests, 1);
    assert_eq!(link.commit_count, 2);
}

#[tokio::test]
async fn replaying_the_same_event_changes_nothing() {
    let h = harness().await;
    let event = merged_pr_event(
        1001,
        "acme/widgets",
        42,
        900042,
        Some(user_summary(7, "alice")),
    );
    h.provider.set_events(vec![event]);
    h.provider.set_pr_commits(
        42,
        vec![
            provider_commit("aaa", Some(user_summary(7, "alice"))),
            provider_commit("bbb", None),
        ],
    );

    run_to_completion(&h, PipelineType::GithubSync).await;
    run_to_completion(&h, PipelineType::DataProcessing).await;
    let counts_once = h.store.entity_counts().await.unwrap();

    // Same event feed again: Sync updates the raw row in place, Process
    // has nothing new to drain
    run_to_completion(&h, PipelineType::GithubSync).await;
    let process = run_to_completion(&h, PipelineType::DataProcessing).await;

    assert_eq!(h.store.count_all().await.unwrap(), 1, "raw row updated, not duplicated");
    assert_eq!(process.items_seen, 0);
    assert_eq!(h.store.entity_counts().await.unwrap(), counts_once);
}

#[tokio::test]
async fn missing_author_provider_id_yields_no_contributor_row() {
    let h = harness().await;
    h.provider.set_events(vec![merged_pr_event(
        1001,
        "acme/widgets",
        42,
        900042,
        Some(user_summary(0, "ghost")),
    )]);

    run_to_completion(&h, PipelineType::GithubSync).await;
    let process = run_to_completion(&h, PipelineType::DataProcessing).await;
    assert_eq!(process.items_succeeded, 1);

    let counts = h.store.entity_counts().await.unwrap();
    assert_eq!(counts.contributors, 0, "unresolvable author creates no row");
    assert_eq!(counts.merge_requests, 1);

    let repo = h
        .store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .unwrap();
    let mr = h
        .store
        .find_merge_request(repo.uuid, 42)
        .await
        .unwrap()
        .unwrap();
    assert!(mr.author_uuid.is_none());
    assert!(mr.author_provider_id.is_none());
    assert_eq!(h.store.count_unprocessed().await.unwrap(), 0, "raw row still processed");
}

#[tokio::test]
async fn event_without_repository_facet_is_staged_then_rejected() {
    let h = harness().await;
    let mut event = merged_pr_event(
        1001,
        "acme/widgets",
        42,
        900042,
        Some(user_summary(7, "alice")),
    );
    event.repository = None;
    h.provider.set_events(vec![event]);

    let sync = run_to_completion(&h, PipelineType::GithubSync).await;
    assert_eq!(sync.items_succeeded, 1, "stored as-is");

    let process = run_to_completion(&h, PipelineType::DataProcessing).await;
    assert_eq!(process.items_failed, 1, "rejected with a tracked failure");
    assert_eq!(h.store.entity_counts().await.unwrap().merge_requests, 0);
    assert_eq!(h.store.count_unprocessed().await.unwrap(), 0);
}
