// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Ranking roll-up and snapshot semantics at the store level: fork
//! contributions are excluded, snapshots are atomic and contiguous, and
//! readers take the newest snapshot.

use chrono::Utc;
use ingestion_pipeline::application::stages::rank::build_snapshot;
use ingestion_pipeline::infrastructure::repositories::SqliteStore;
use ingestion_pipeline_domain::entities::RankWeights;
use ingestion_pipeline_domain::repositories::{
    ActivityBundle, EntityRepository, RankingRepository, RawActivityRepository,
};
use ingestion_pipeline_domain::value_objects::activity_payload::{
    PullRequestFacet, RepositoryFacet, UserFacet,
};

fn alice() -> Option<UserFacet> {
    Some(UserFacet {
        provider_id: 7,
        login: Some("alice".into()),
        ..Default::default()
    })
}

fn contribution(
    raw_id: i64,
    repo_provider_id: i64,
    full_name: &str,
    is_fork: bool,
    number: i64,
    additions: i64,
) -> ActivityBundle {
    ActivityBundle {
        raw_id,
        repository: RepositoryFacet {
            provider_id: repo_provider_id,
            full_name: full_name.to_string(),
            is_fork,
            ..Default::default()
        },
        pull_request: PullRequestFacet {
            number,
            title: format!("PR {}", number),
            author: alice(),
            additions,
            deletions: 1,
            ..Default::default()
        },
        commits: vec![],
    }
}

async fn seeded_store() -> SqliteStore {
    let store = SqliteStore::in_memory().await.unwrap();
    for key in [1, 2] {
        store.upsert_raw(key, "{}").await.unwrap();
    }
    // One real repository, one fork, same contributor
    store
        .apply_activity(&contribution(1, 1001, "acme/widgets", false, 1, 100))
        .await
        .unwrap();
    store
        .apply_activity(&contribution(2, 1002, "acme/widgets-fork", true, 2, 9000))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn fork_contributions_are_excluded_from_metrics() {
    let store = seeded_store().await;

    let metrics = store.collect_contributor_metrics().await.unwrap();
    assert_eq!(metrics.len(), 1);
    let alice = &metrics[0];
    assert_eq!(alice.contributor_provider_id, 7);
    // Only the non-fork PR counts: 100 added + 1 removed
    assert_eq!(alice.lines_added, 100);
    assert_eq!(alice.lines_removed, 1);
    assert_eq!(alice.merge_request_count, 1);
    assert_eq!(alice.repositories_contributed, 1);
}

#[tokio::test]
async fn snapshot_is_contiguous_and_single_timestamped() {
    let store = seeded_store().await;
    let metrics = store.collect_contributor_metrics().await.unwrap();

    let calculated_at = Utc::now();
    let rows = build_snapshot(&metrics, &RankWeights::default(), calculated_at);
    store.insert_snapshot(&rows, calculated_at).await.unwrap();

    let snapshot = store.latest_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), metrics.len());
    for (index, row) in snapshot.iter().enumerate() {
        assert_eq!(row.rank_position, index as i64 + 1);
        assert_eq!(row.calculation_timestamp, calculated_at);
    }
}

#[tokio::test]
async fn readers_take_the_newest_snapshot() {
    let store = seeded_store().await;
    let metrics = store.collect_contributor_metrics().await.unwrap();

    let older = Utc::now() - chrono::Duration::hours(1);
    let newer = Utc::now();
    store
        .insert_snapshot(
            &build_snapshot(&metrics, &RankWeights::default(), older),
            older,
        )
        .await
        .unwrap();
    store
        .insert_snapshot(
            &build_snapshot(&metrics, &RankWeights::default(), newer),
            newer,
        )
        .await
        .unwrap();

    let latest = store.latest_snapshot().await.unwrap();
    assert!(latest.iter().all(|row| row.calculation_timestamp == newer));
}

#[tokio::test]
async fn placeholder_contributors_are_not_ranked() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.upsert_raw(1, "{}").await.unwrap();
    store
        .apply_activity(&ActivityBundle {
            raw_id: 1,
            repository: RepositoryFacet {
                provider_id: 1001,
                full_name: "acme/widgets".into(),
                ..Default::default()
            },
            pull_request: PullRequestFacet {
                number: 1,
                author: Some(UserFacet {
                    provider_id: 55,
                    login: Some("unknown".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            commits: vec![],
        })
        .await
        .unwrap();

    let metrics = store.collect_contributor_metrics().await.unwrap();
    assert!(metrics.is_empty(), "sentinel identities never rank");
}
