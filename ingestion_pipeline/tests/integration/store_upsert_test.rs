// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Upsert and enrichment-state behavior of the SQLite store: stable uuids
//! on replay, deterministic unenriched pages, monotonic enrichment
//! transitions.

use ingestion_pipeline::infrastructure::repositories::SqliteStore;
use ingestion_pipeline_domain::repositories::{
    ActivityBundle, EnrichableKind, EntityRepository, RawActivityRepository,
};
use ingestion_pipeline_domain::services::provider_client::{ProviderRepository, ProviderUser};
use ingestion_pipeline_domain::value_objects::activity_payload::{
    CommitFacet, PullRequestFacet, RepositoryFacet, UserFacet,
};

fn bundle(raw_id: i64, repo_provider_id: i64, full_name: &str, number: i64) -> ActivityBundle {
    ActivityBundle {
        raw_id,
        repository: RepositoryFacet {
            provider_id: repo_provider_id,
            full_name: full_name.to_string(),
            ..Default::default()
        },
        pull_request: PullRequestFacet {
            number,
            title: format!("PR {}", number),
            author: Some(UserFacet {
                provider_id: 7,
                login: Some("alice".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        commits: vec![CommitFacet {
            sha: format!("sha-{}", number),
            ..Default::default()
        }],
    }
}

async fn store_with_staged(keys: &[i64]) -> SqliteStore {
    let store = SqliteStore::in_memory().await.unwrap();
    for key in keys {
        store.upsert_raw(*key, "{}").await.unwrap();
    }
    store
}

#[tokio::test]
async fn upsert_replay_preserves_uuids_and_row_counts() {
    let store = store_with_staged(&[1, 2]).await;
    let b = bundle(1, 1001, "acme/widgets", 42);

    let first = store.apply_activity(&b).await.unwrap();
    let second = store.apply_activity(&b).await.unwrap();

    assert_eq!(first.repository_uuid, second.repository_uuid);
    assert_eq!(first.merge_request_uuid, second.merge_request_uuid);
    assert_eq!(first.author_uuid, second.author_uuid);

    let counts = store.entity_counts().await.unwrap();
    assert_eq!(counts.repositories, 1);
    assert_eq!(counts.contributors, 1);
    assert_eq!(counts.merge_requests, 1);
    assert_eq!(counts.commits, 1);
}

#[tokio::test]
async fn same_pr_number_in_different_repositories_is_distinct() {
    let store = store_with_staged(&[1, 2]).await;

    let a = store
        .apply_activity(&bundle(1, 1001, "acme/widgets", 42))
        .await
        .unwrap();
    let b = store
        .apply_activity(&bundle(2, 2002, "acme/gears", 42))
        .await
        .unwrap();

    assert_ne!(a.repository_uuid, b.repository_uuid);
    assert_ne!(a.merge_request_uuid, b.merge_request_uuid);
    let counts = store.entity_counts().await.unwrap();
    assert_eq!(counts.merge_requests, 2);
}

#[tokio::test]
async fn unenriched_pages_are_insertion_ordered_and_attempt_capped() {
    let store = store_with_staged(&[1, 2, 3]).await;
    store
        .apply_activity(&bundle(1, 1001, "acme/widgets", 1))
        .await
        .unwrap();
    store
        .apply_activity(&bundle(2, 1002, "acme/gears", 2))
        .await
        .unwrap();
    store
        .apply_activity(&bundle(3, 1003, "acme/bolts", 3))
        .await
        .unwrap();

    let page = store.unenriched_repositories(2, 3).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].provider_id, 1001);
    assert_eq!(page[1].provider_id, 1002);

    // Burn through the attempt budget of the first repository
    for _ in 0..3 {
        store
            .record_enrichment_failure(EnrichableKind::Repository, page[0].uuid.as_uuid())
            .await
            .unwrap();
    }
    let page = store.unenriched_repositories(10, 3).await.unwrap();
    assert!(
        page.iter().all(|r| r.provider_id != 1001),
        "attempt-capped repository must drop out of selection"
    );
}

#[tokio::test]
async fn repository_enrichment_is_monotonic_and_merges_detail() {
    let store = store_with_staged(&[1]).await;
    let applied = store
        .apply_activity(&bundle(1, 1001, "acme/widgets", 42))
        .await
        .unwrap();

    let detail = ProviderRepository {
        provider_id: 1001,
        full_name: "acme/widgets".into(),
        name: "widgets".into(),
        description: Some("a widget factory".into()),
        stars: 99,
        primary_language: Some("Rust".into()),
        default_branch: Some("main".into()),
        ..Default::default()
    };
    store
        .apply_repository_enrichment(applied.repository_uuid, &detail)
        .await
        .unwrap();

    let repo = store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .unwrap();
    assert!(repo.is_enriched);
    assert_eq!(repo.enrichment_attempts, 1);
    assert_eq!(repo.stars, 99);
    assert_eq!(repo.description.as_deref(), Some("a widget factory"));

    // Not selectable any more
    assert!(store.unenriched_repositories(10, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn contributor_enrichment_reconciles_renamed_login() {
    let store = store_with_staged(&[1]).await;
    let applied = store
        .apply_activity(&bundle(1, 1001, "acme/widgets", 42))
        .await
        .unwrap();
    let author_uuid = applied.author_uuid.unwrap();

    let detail = ProviderUser {
        provider_id: 7,
        login: Some("alice-renamed".into()),
        name: Some("Alice".into()),
        followers: 12,
        ..Default::default()
    };
    store
        .apply_contributor_enrichment(author_uuid, &detail)
        .await
        .unwrap();

    let row = store
        .find_contributor_by_provider_id(7)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.username.as_deref(), Some("alice-renamed"));
    assert_eq!(row.followers, 12);
    assert!(row.is_enriched);
}

#[tokio::test]
async fn not_found_marks_enriched_without_detail() {
    let store = store_with_staged(&[1]).await;
    let applied = store
        .apply_activity(&bundle(1, 1001, "acme/widgets", 42))
        .await
        .unwrap();

    store
        .mark_enriched_not_found(EnrichableKind::Repository, applied.repository_uuid.as_uuid())
        .await
        .unwrap();

    let repo = store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .unwrap();
    assert!(repo.is_enriched);
    assert_eq!(repo.enrichment_attempts, 1);
    // Facts untouched
    assert_eq!(repo.stars, 0);
}
