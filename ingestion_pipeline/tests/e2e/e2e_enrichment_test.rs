// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Enrichment acceptance scenarios: rate-limit policy in both batch and
//! process-all modes, the provider-request witness for enriched entities,
//! and username reconciliation.

use chrono::Utc;

use crate::common::{harness, merged_pr_event, user_summary, TestHarness};

use ingestion_pipeline::application::services::StartOutcome;
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::EntityRepository;
use ingestion_pipeline_domain::services::provider_client::{
    ProviderPullRequest, ProviderRepository, ProviderUser,
};
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

fn repository_detail(provider_id: i64, full_name: &str) -> ProviderRepository {
    let name = full_name.split_once('/').unwrap().1.to_string();
    ProviderRepository {
        provider_id,
        full_name: full_name.to_string(),
        name,
        description: Some("detail".into()),
        stars: 50,
        primary_language: Some("Rust".into()),
        ..Default::default()
    }
}

/// Seeds two repositories (via two staged PRs) and drains Process so both
/// are unenriched afterwards.
async fn seed_two_repositories(h: &TestHarness) {
    h.provider.set_events(vec![
        merged_pr_event(1001, "acme/widgets", 42, 900042, Some(user_summary(7, "alice"))),
        merged_pr_event(1002, "acme/gears", 5, 900043, Some(user_summary(7, "alice"))),
    ]);
    for pipeline in [PipelineType::GithubSync, PipelineType::DataProcessing] {
        h.orchestrator
            .start(pipeline, TriggerKind::Direct, false, true)
            .await
            .unwrap();
    }
    h.provider.request_log.lock().clear();
}

async fn run_enrich(h: &TestHarness, process_all: bool) -> ingestion_pipeline::application::stages::StageReport {
    match h
        .orchestrator
        .start(PipelineType::DataEnrichment, TriggerKind::Direct, process_all, true)
        .await
        .unwrap()
    {
        StartOutcome::Completed { report, .. } => report,
        StartOutcome::Started { .. } => panic!("synchronous run reported as started"),
    }
}

#[tokio::test]
async fn rate_limit_in_batch_mode_finishes_cleanly_with_subset() {
    let h = harness().await;
    seed_two_repositories(&h).await;

    h.provider.add_repository(repository_detail(1001, "acme/widgets"));
    h.provider.add_repository(repository_detail(1002, "acme/gears"));
    // First repository call succeeds, second hits the quota
    h.provider.script_repository_ok();
    h.provider.script_repository_error(PipelineError::rate_limited(
        Utc::now() + chrono::Duration::seconds(2),
    ));

    let report = run_enrich(&h, false).await;
    assert!(report.rate_limit_hit);

    let first = h
        .store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .unwrap();
    let second = h
        .store
        .find_repository_by_provider_id(1002)
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_enriched, "first repository enriched before the hit");
    assert!(!second.is_enriched, "second repository left for the next run");
    // The rate-limited attempt did not burn the second repository's budget
    assert_eq!(second.enrichment_attempts, 0);
}

#[tokio::test]
async fn rate_limit_in_process_all_mode_waits_out_the_reset() {
    let h = harness().await;
    seed_two_repositories(&h).await;

    h.provider.add_repository(repository_detail(1001, "acme/widgets"));
    h.provider.add_repository(repository_detail(1002, "acme/gears"));
    h.provider.script_repository_ok();
    h.provider.script_repository_error(PipelineError::rate_limited(
        Utc::now() + chrono::Duration::seconds(1),
    ));

    let report = run_enrich(&h, true).await;
    assert!(!report.rate_limit_hit, "the wait absorbed the quota hit");

    for provider_id in [1001, 1002] {
        let repo = h
            .store
            .find_repository_by_provider_id(provider_id)
            .await
            .unwrap()
            .unwrap();
        assert!(repo.is_enriched, "repository {} enriched after reset", provider_id);
    }
}

#[tokio::test]
async fn every_enriched_entity_has_a_provider_request_on_record() {
    let h = harness().await;
    h.provider.set_events(vec![merged_pr_event(
        1001,
        "acme/widgets",
        42,
        900042,
        Some(user_summary(7, "alice")),
    )]);
    for pipeline in [PipelineType::GithubSync, PipelineType::DataProcessing] {
        h.orchestrator
            .start(pipeline, TriggerKind::Direct, false, true)
            .await
            .unwrap();
    }
    h.provider.request_log.lock().clear();

    h.provider.add_repository(repository_detail(1001, "acme/widgets"));
    h.provider.add_user(ProviderUser {
        provider_id: 7,
        login: Some("alice".into()),
        followers: 3,
        ..Default::default()
    });
    h.provider.add_pull_request(
        "acme",
        "widgets",
        ProviderPullRequest {
            number: 42,
            title: "Add widget".into(),
            additions: 10,
            deletions: 2,
            ..Default::default()
        },
    );

    run_enrich(&h, false).await;
    let requests = h.provider.requests();

    let repo = h
        .store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .unwrap();
    assert!(repo.is_enriched);
    assert!(requests.iter().any(|r| r == "get_repository acme/widgets"));

    let alice = h
        .store
        .find_contributor_by_provider_id(7)
        .await
        .unwrap()
        .unwrap();
    assert!(alice.is_enriched);
    assert!(requests.iter().any(|r| r == "get_user 7"));

    let mr = h
        .store
        .find_merge_request(repo.uuid, 42)
        .await
        .unwrap()
        .unwrap();
    assert!(mr.is_enriched);
    assert!(requests.iter().any(|r| r == "get_pull_request acme/widgets#42"));
}

#[tokio::test]
async fn not_found_entities_are_retired_not_retried() {
    let h = harness().await;
    seed_two_repositories(&h).await;
    // No canned repositories: every detail call answers not-found

    let report = run_enrich(&h, false).await;
    assert!(report.not_found >= 2);

    for provider_id in [1001, 1002] {
        let repo = h
            .store
            .find_repository_by_provider_id(provider_id)
            .await
            .unwrap()
            .unwrap();
        assert!(repo.is_enriched, "retired so it is never reselected");
    }
    // A second run has nothing left to fetch
    h.provider.request_log.lock().clear();
    run_enrich(&h, false).await;
    let repo_requests = h
        .provider
        .requests()
        .into_iter()
        .filter(|r| r.starts_with("get_repository"))
        .count();
    assert_eq!(repo_requests, 0);
}

#[tokio::test]
async fn enrichment_reconciles_renamed_usernames() {
    let h = harness().await;
    h.provider.set_events(vec![merged_pr_event(
        1001,
        "acme/widgets",
        42,
        900042,
        Some(user_summary(7, "alice")),
    )]);
    for pipeline in [PipelineType::GithubSync, PipelineType::DataProcessing] {
        h.orchestrator
            .start(pipeline, TriggerKind::Direct, false, true)
            .await
            .unwrap();
    }

    h.provider.add_repository(repository_detail(1001, "acme/widgets"));
    h.provider.add_user(ProviderUser {
        provider_id: 7,
        login: Some("alice-renamed".into()),
        ..Default::default()
    });

    run_enrich(&h, false).await;

    let alice = h
        .store
        .find_contributor_by_provider_id(7)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.username.as_deref(), Some("alice-renamed"));
}

#[tokio::test]
async fn transient_failures_burn_attempts_until_the_cap() {
    let h = harness().await;
    seed_two_repositories(&h).await;
    h.provider.add_repository(repository_detail(1001, "acme/widgets"));
    h.provider.add_repository(repository_detail(1002, "acme/gears"));

    // Three runs, each failing the first repository transiently
    for _ in 0..3 {
        h.provider
            .script_repository_error(PipelineError::provider_transient("flaky backend"));
        run_enrich(&h, false).await;
    }

    let first = h
        .store
        .find_repository_by_provider_id(1001)
        .await
        .unwrap()
        .unwrap();
    assert!(!first.is_enriched);
    assert_eq!(first.enrichment_attempts, 3);

    // Attempt cap reached: no further repository fetches for it
    h.provider.request_log.lock().clear();
    run_enrich(&h, false).await;
    assert!(!h
        .provider
        .requests()
        .iter()
        .any(|r| r == "get_repository acme/widgets"));
}
