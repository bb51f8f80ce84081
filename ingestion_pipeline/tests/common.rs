// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Test Helpers
//!
//! Shared fixtures for the integration and end-to-end suites: an in-memory
//! harness wiring the real stages to a scripted provider client, plus
//! payload builders for the acceptance scenarios.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use ingestion_pipeline_bootstrap::shutdown::CancellationToken;
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::JobRepository;
use ingestion_pipeline_domain::services::provider_client::{
    ProviderClient, ProviderCommit, ProviderEventRepository, ProviderPullRequest,
    ProviderPullRequestEvent, ProviderRepository, ProviderUser, ProviderUserSummary,
    RateLimitSnapshot,
};

use ingestion_pipeline::application::services::PipelineOrchestrator;
use ingestion_pipeline::application::stages::{
    EnrichStage, ProcessStage, RankStage, Stage, SyncStage,
};
use ingestion_pipeline::infrastructure::metrics::MetricsService;
use ingestion_pipeline::infrastructure::repositories::{SqliteJobStore, SqliteStore};
use ingestion_pipeline_domain::entities::RankWeights;

/// A scripted provider double. Every call is appended to the request log
/// (the P2 witness); per-endpoint error queues are consumed before the
/// canned responses.
#[derive(Default)]
pub struct FakeProviderClient {
    pub events: Mutex<Vec<ProviderPullRequestEvent>>,
    /// PR number → commits returned by `list_pull_request_commits`
    pub pr_commits: Mutex<HashMap<i64, Vec<ProviderCommit>>>,
    /// `owner/name` → repository detail
    pub repositories: Mutex<HashMap<String, ProviderRepository>>,
    /// provider id → user detail
    pub users: Mutex<HashMap<i64, ProviderUser>>,
    /// `owner/name#number` → pull request detail
    pub pull_requests: Mutex<HashMap<String, ProviderPullRequest>>,
    /// `owner/name@sha` → commit detail
    pub commits: Mutex<HashMap<String, ProviderCommit>>,
    /// Scripted per-call outcomes for repository detail calls: `None`
    /// answers from the canned map, `Some(e)` fails that call. An empty
    /// queue always answers from the map.
    pub repository_script: Mutex<VecDeque<Option<PipelineError>>>,
    /// Same, for user detail calls
    pub user_script: Mutex<VecDeque<Option<PipelineError>>>,
    /// Artificial latency per event-list call, for races in tests
    pub list_delay: Mutex<Option<Duration>>,
    pub request_log: Mutex<Vec<String>>,
}

impl FakeProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, entry: impl Into<String>) {
        self.request_log.lock().push(entry.into());
    }

    pub fn requests(&self) -> Vec<String> {
        self.request_log.lock().clone()
    }

    pub fn set_events(&self, events: Vec<ProviderPullRequestEvent>) {
        *self.events.lock() = events;
    }

    pub fn set_pr_commits(&self, number: i64, commits: Vec<ProviderCommit>) {
        self.pr_commits.lock().insert(number, commits);
    }

    pub fn add_repository(&self, detail: ProviderRepository) {
        self.repositories
            .lock()
            .insert(detail.full_name.clone(), detail);
    }

    pub fn add_user(&self, detail: ProviderUser) {
        self.users.lock().insert(detail.provider_id, detail);
    }

    pub fn add_pull_request(&self, owner: &str, name: &str, detail: ProviderPullRequest) {
        self.pull_requests
            .lock()
            .insert(format!("{}/{}#{}", owner, name, detail.number), detail);
    }

    pub fn script_repository_ok(&self) {
        self.repository_script.lock().push_back(None);
    }

    pub fn script_repository_error(&self, error: PipelineError) {
        self.repository_script.lock().push_back(Some(error));
    }

    pub fn script_user_error(&self, error: PipelineError) {
        self.user_script.lock().push_back(Some(error));
    }
}

#[async_trait]
impl ProviderClient for FakeProviderClient {
    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<ProviderRepository, PipelineError> {
        self.log(format!("get_repository {}/{}", owner, name));
        if let Some(Some(error)) = self.repository_script.lock().pop_front() {
            return Err(error);
        }
        self.repositories
            .lock()
            .get(&format!("{}/{}", owner, name))
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("repository {}/{}", owner, name)))
    }

    async fn get_user(&self, provider_id: i64) -> Result<ProviderUser, PipelineError> {
        self.log(format!("get_user {}", provider_id));
        if let Some(Some(error)) = self.user_script.lock().pop_front() {
            return Err(error);
        }
        self.users
            .lock()
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("user {}", provider_id)))
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<ProviderPullRequest, PipelineError> {
        self.log(format!("get_pull_request {}/{}#{}", owner, name, number));
        self.pull_requests
            .lock()
            .get(&format!("{}/{}#{}", owner, name, number))
            .cloned()
            .ok_or_else(|| {
                PipelineError::not_found(format!("pull request {}/{}#{}", owner, name, number))
            })
    }

    async fn get_commit(
        &self,
        owner: &str,
        name: &str,
        sha: &str,
    ) -> Result<ProviderCommit, PipelineError> {
        self.log(format!("get_commit {}/{}@{}", owner, name, sha));
        self.commits
            .lock()
            .get(&format!("{}/{}@{}", owner, name, sha))
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("commit {}/{}@{}", owner, name, sha)))
    }

    async fn list_recent_merged_pull_request_events(
        &self,
    ) -> Result<Vec<ProviderPullRequestEvent>, PipelineError> {
        self.log("list_recent_merged_pull_request_events");
        let delay = *self.list_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.events.lock().clone())
    }

    async fn list_pull_request_commits(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<Vec<ProviderCommit>, PipelineError> {
        self.log(format!("list_pull_request_commits {}/{}#{}", owner, name, number));
        Ok(self
            .pr_commits
            .lock()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    fn rate_limit(&self) -> RateLimitSnapshot {
        RateLimitSnapshot::default()
    }
}

// ----- fixtures ---------------------------------------------------------------

pub fn user_summary(provider_id: i64, login: &str) -> ProviderUserSummary {
    ProviderUserSummary {
        provider_id,
        login: Some(login.to_string()),
        ..Default::default()
    }
}

pub fn provider_commit(sha: &str, author: Option<ProviderUserSummary>) -> ProviderCommit {
    ProviderCommit {
        sha: sha.to_string(),
        message: format!("commit {}", sha),
        author,
        committed_at: Some(Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()),
        additions: 5,
        deletions: 1,
        files_changed: 1,
        parent_shas: vec!["base".to_string()],
    }
}

/// One merged-PR event in the shape Sync consumes.
pub fn merged_pr_event(
    repo_provider_id: i64,
    full_name: &str,
    number: i64,
    internal_id: i64,
    author: Option<ProviderUserSummary>,
) -> ProviderPullRequestEvent {
    ProviderPullRequestEvent {
        repository: Some(ProviderEventRepository {
            provider_id: repo_provider_id,
            full_name: full_name.to_string(),
            url: Some(format!("https://example.test/{}", full_name)),
        }),
        pull_request: ProviderPullRequest {
            number,
            internal_id: Some(internal_id),
            title: format!("PR #{}", number),
            author,
            merged_at: Some(Utc.with_ymd_and_hms(2025, 5, 1, 12, 30, 0).unwrap()),
            created_at: Some(Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()),
            additions: 10,
            deletions: 2,
            commits: 2,
            changed_files: 3,
            state: Some("closed".to_string()),
            ..Default::default()
        },
    }
}

// ----- harness ----------------------------------------------------------------

pub struct TestHarness {
    pub store: Arc<SqliteStore>,
    pub job: Arc<SqliteJobStore>,
    pub provider: Arc<FakeProviderClient>,
    pub metrics: Arc<MetricsService>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub root: CancellationToken,
}

/// Wires the real stages to an in-memory store and the scripted provider.
pub async fn harness() -> TestHarness {
    let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
    let job = Arc::new(SqliteJobStore::new(store.pool().clone()));
    let provider = Arc::new(FakeProviderClient::new());
    let metrics = Arc::new(MetricsService::new().expect("metrics"));
    let root = CancellationToken::new();

    let job_port: Arc<dyn JobRepository> = job.clone();
    let provider_port: Arc<dyn ProviderClient> = provider.clone();

    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(SyncStage::new(
            provider_port.clone(),
            store.clone(),
            job_port.clone(),
        )),
        Arc::new(ProcessStage::new(
            store.clone(),
            store.clone(),
            job_port.clone(),
            100,
        )),
        Arc::new(EnrichStage::new(
            provider_port,
            store.clone(),
            job_port.clone(),
            3,
        )),
        Arc::new(RankStage::new(store.clone(), RankWeights::default())),
    ];

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        job_port,
        stages,
        metrics.clone(),
        root.clone(),
    ));
    orchestrator.startup().await.expect("startup");

    TestHarness {
        store,
        job,
        provider,
        metrics,
        orchestrator,
        root,
    }
}
