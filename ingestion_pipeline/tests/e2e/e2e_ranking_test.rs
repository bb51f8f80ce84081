// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Ranking acceptance: the `ai_analysis` pipeline writes one atomic
//! snapshot, fork contributions are excluded from the raw counters, and
//! positions are deterministic.

use crate::common::{harness, merged_pr_event, user_summary, TestHarness};

use ingestion_pipeline::application::services::StartOutcome;
use ingestion_pipeline_domain::repositories::RankingRepository;
use ingestion_pipeline_domain::services::provider_client::ProviderPullRequestEvent;
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

async fn ingest(h: &TestHarness, events: Vec<ProviderPullRequestEvent>) {
    h.provider.set_events(events);
    for pipeline in [PipelineType::GithubSync, PipelineType::DataProcessing] {
        h.orchestrator
            .start(pipeline, TriggerKind::Direct, false, true)
            .await
            .unwrap();
    }
}

async fn run_rank(h: &TestHarness) -> i64 {
    match h
        .orchestrator
        .start(PipelineType::AiAnalysis, TriggerKind::Direct, false, true)
        .await
        .unwrap()
    {
        StartOutcome::Completed { report, .. } => report.items_processed(),
        StartOutcome::Started { .. } => panic!("synchronous run reported as started"),
    }
}

#[tokio::test]
async fn fork_contributions_are_excluded_from_the_snapshot() {
    let h = harness().await;

    // Alice contributes to a real repository and to a fork
    let mut fork_event = merged_pr_event(
        2002,
        "alice/widgets-fork",
        3,
        900100,
        Some(user_summary(7, "alice")),
    );
    fork_event.pull_request.additions = 9_000;
    ingest(
        &h,
        vec![
            merged_pr_event(1001, "acme/widgets", 42, 900042, Some(user_summary(7, "alice"))),
            fork_event,
        ],
    )
    .await;

    // The event facet cannot mark forks; flag it the way enrichment would
    sqlx::query("UPDATE repositories SET is_fork = 1 WHERE provider_id = 2002")
        .execute(h.store.pool())
        .await
        .unwrap();

    let ranked = run_rank(&h).await;
    assert_eq!(ranked, 1);

    let snapshot = h.store.latest_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    let alice = &snapshot[0];
    assert_eq!(alice.contributor_provider_id, 7);
    assert_eq!(alice.rank_position, 1);
    // The fork's 9000 added lines are not in the raw counters
    assert_eq!(alice.raw_lines_added, 10);
    assert_eq!(alice.repositories_contributed, 1);
    assert_eq!(alice.raw_merge_requests, 1);
}

#[tokio::test]
async fn snapshot_positions_cover_the_cohort() {
    let h = harness().await;
    ingest(
        &h,
        vec![
            merged_pr_event(1001, "acme/widgets", 1, 900001, Some(user_summary(7, "alice"))),
            merged_pr_event(1002, "acme/gears", 2, 900002, Some(user_summary(8, "bob"))),
            merged_pr_event(1003, "acme/bolts", 3, 900003, Some(user_summary(9, "carol"))),
        ],
    )
    .await;

    let ranked = run_rank(&h).await;
    assert_eq!(ranked, 3);

    let snapshot = h.store.latest_snapshot().await.unwrap();
    let positions: Vec<i64> = snapshot.iter().map(|row| row.rank_position).collect();
    assert_eq!(positions, vec![1, 2, 3]);

    let timestamp = snapshot[0].calculation_timestamp;
    assert!(snapshot.iter().all(|row| row.calculation_timestamp == timestamp));
}

#[tokio::test]
async fn rerunning_rank_produces_a_newer_snapshot() {
    let h = harness().await;
    ingest(
        &h,
        vec![merged_pr_event(
            1001,
            "acme/widgets",
            42,
            900042,
            Some(user_summary(7, "alice")),
        )],
    )
    .await;

    run_rank(&h).await;
    let first = h.store.latest_snapshot().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    run_rank(&h).await;
    let second = h.store.latest_snapshot().await.unwrap();

    assert!(second[0].calculation_timestamp > first[0].calculation_timestamp);
    // Same data, same order
    assert_eq!(
        first.iter().map(|r| r.contributor_provider_id).collect::<Vec<_>>(),
        second.iter().map(|r| r.contributor_provider_id).collect::<Vec<_>>(),
    );
}

#[tokio::test]
async fn empty_store_ranks_nothing_without_failing() {
    let h = harness().await;
    let ranked = run_rank(&h).await;
    assert_eq!(ranked, 0);
    assert!(h.store.latest_snapshot().await.unwrap().is_empty());
}
