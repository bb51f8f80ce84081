// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Store
//!
//! The embedded-store implementation behind the entity, raw-staging, and
//! ranking ports. One database file, one writer connection, write-ahead
//! journaling; every natural-key uniqueness rule is a real constraint in the
//! schema, and every upsert resolves to the stable uuid of the existing row
//! on conflict.
//!
//! ## Transaction boundaries
//!
//! - `apply_activity` is one transaction per staged payload: repository,
//!   contributors, merge request, commits, the junction fold, and the raw
//!   row's processed flag all commit together or not at all. Because the
//!   processed flag gates selection, a payload can never be double-counted.
//! - `insert_snapshot` is one transaction per ranking snapshot.
//! - Everything else is a single statement.
//!
//! ## Contention
//!
//! Busy/locked conditions are retried in-process with exponential backoff on
//! top of SQLite's own busy timeout; only after exhaustion do they surface,
//! as `DatabaseBusy`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use ingestion_pipeline_domain::entities::{
    Commit, Contributor, ContributorMetrics, ContributorRanking, ContributorRepository,
    MergeRequest, MergeRequestState, RawMergeRequest, Repository,
};
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{
    ActivityBundle, AppliedActivity, EnrichableKind, EntityCounts, EntityRepository,
    RankingRepository, RawActivityRepository, RawUpsertOutcome,
};
use ingestion_pipeline_domain::services::provider_client::{
    ProviderCommit, ProviderPullRequest, ProviderRepository, ProviderUser, ProviderUserSummary,
};
use ingestion_pipeline_domain::value_objects::activity_payload::UserFacet;
use ingestion_pipeline_domain::value_objects::entity_id::{
    ContributorId, MergeRequestId, RepositoryId,
};

use super::schema;

const BUSY_RETRIES: u32 = 4;
const BUSY_BASE_DELAY: Duration = Duration::from_millis(50);

/// SQLite-backed implementation of the entity, raw-staging, and ranking
/// ports.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wraps an already-initialized pool (schema must be current).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the store file at `path`.
    pub async fn open(path: &str) -> Result<Self, PipelineError> {
        let pool = schema::initialize_database(path).await?;
        Ok(Self::new(pool))
    }

    /// An in-memory store for tests.
    pub async fn in_memory() -> Result<Self, PipelineError> {
        let pool = schema::in_memory_pool().await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool, for components sharing the connection (job
    /// store, health checks).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ----- error mapping and retry ------------------------------------------------

/// Maps a sqlx error into the domain vocabulary, distinguishing busy and
/// constraint conditions from everything else.
pub(crate) fn map_db_err(context: &str, e: sqlx::Error) -> PipelineError {
    if let Some(db_err) = e.as_database_error() {
        let message = db_err.message().to_string();
        let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
        // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
        if code == "5" || code == "6" || message.contains("database is locked") {
            return PipelineError::DatabaseBusy(format!("{}: {}", context, message));
        }
        if db_err.is_unique_violation()
            || db_err.is_foreign_key_violation()
            || message.contains("constraint")
        {
            return PipelineError::integrity_violation(format!("{}: {}", context, message));
        }
        return PipelineError::database_error(format!("{}: {}", context, message));
    }
    PipelineError::database_error(format!("{}: {}", context, e))
}

/// Bounded retry with exponential backoff for busy conditions.
pub(crate) async fn with_busy_retry<T, F, Fut>(op: &str, mut run: F) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let mut delay = BUSY_BASE_DELAY;
    let mut attempt = 0;
    loop {
        match run().await {
            Err(PipelineError::DatabaseBusy(message)) if attempt < BUSY_RETRIES => {
                attempt += 1;
                debug!(op, attempt, %message, "store busy, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
    }
}

// ----- row mapping ------------------------------------------------------------

fn get_id<T: ingestion_pipeline_domain::value_objects::entity_id::IdKind>(
    row: &SqliteRow,
    column: &str,
) -> Result<ingestion_pipeline_domain::value_objects::entity_id::EntityId<T>, PipelineError> {
    let text: String = row
        .try_get(column)
        .map_err(|e| map_db_err(column, e))?;
    text.parse()
}

fn get_opt_id<T: ingestion_pipeline_domain::value_objects::entity_id::IdKind>(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<ingestion_pipeline_domain::value_objects::entity_id::EntityId<T>>, PipelineError>
{
    let text: Option<String> = row
        .try_get(column)
        .map_err(|e| map_db_err(column, e))?;
    text.map(|t| t.parse()).transpose()
}

fn decode_string_list(text: &str) -> Result<Vec<String>, PipelineError> {
    serde_json::from_str(text).map_err(|e| {
        PipelineError::SerializationError(format!("malformed string-list column: {}", e))
    })
}

fn encode_string_list(list: &[String]) -> Result<String, PipelineError> {
    serde_json::to_string(list)
        .map_err(|e| PipelineError::SerializationError(format!("unencodable string list: {}", e)))
}

fn row_to_repository(row: &SqliteRow) -> Result<Repository, PipelineError> {
    let ctx = |e| map_db_err("repositories row", e);
    Ok(Repository {
        uuid: get_id(row, "uuid")?,
        provider_id: row.try_get("provider_id").map_err(ctx)?,
        full_name: row.try_get("full_name").map_err(ctx)?,
        name: row.try_get("name").map_err(ctx)?,
        url: row.try_get("url").map_err(ctx)?,
        description: row.try_get("description").map_err(ctx)?,
        stars: row.try_get("stars").map_err(ctx)?,
        forks: row.try_get("forks").map_err(ctx)?,
        watchers: row.try_get("watchers").map_err(ctx)?,
        open_issues: row.try_get("open_issues").map_err(ctx)?,
        size_kb: row.try_get("size_kb").map_err(ctx)?,
        primary_language: row.try_get("primary_language").map_err(ctx)?,
        default_branch: row.try_get("default_branch").map_err(ctx)?,
        is_fork: row.try_get("is_fork").map_err(ctx)?,
        is_archived: row.try_get("is_archived").map_err(ctx)?,
        is_enriched: row.try_get("is_enriched").map_err(ctx)?,
        enrichment_attempts: row.try_get("enrichment_attempts").map_err(ctx)?,
        owner_uuid: get_opt_id(row, "owner_uuid")?,
        owner_provider_id: row.try_get("owner_provider_id").map_err(ctx)?,
        last_updated: row.try_get("last_updated").map_err(ctx)?,
        created_at: row.try_get("created_at").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
    })
}

fn row_to_contributor(row: &SqliteRow) -> Result<Contributor, PipelineError> {
    let ctx = |e| map_db_err("contributors row", e);
    let top_languages: String = row.try_get("top_languages").map_err(ctx)?;
    let organizations: String = row.try_get("organizations").map_err(ctx)?;
    Ok(Contributor {
        uuid: get_id(row, "uuid")?,
        provider_id: row.try_get("provider_id").map_err(ctx)?,
        username: row.try_get("username").map_err(ctx)?,
        name: row.try_get("name").map_err(ctx)?,
        avatar_url: row.try_get("avatar_url").map_err(ctx)?,
        bio: row.try_get("bio").map_err(ctx)?,
        company: row.try_get("company").map_err(ctx)?,
        blog: row.try_get("blog").map_err(ctx)?,
        twitter: row.try_get("twitter").map_err(ctx)?,
        location: row.try_get("location").map_err(ctx)?,
        followers: row.try_get("followers").map_err(ctx)?,
        public_repos: row.try_get("public_repos").map_err(ctx)?,
        impact_score: row.try_get("impact_score").map_err(ctx)?,
        role_classification: row.try_get("role_classification").map_err(ctx)?,
        top_languages: decode_string_list(&top_languages)?,
        organizations: decode_string_list(&organizations)?,
        first_contribution: row.try_get("first_contribution").map_err(ctx)?,
        last_contribution: row.try_get("last_contribution").map_err(ctx)?,
        direct_commits: row.try_get("direct_commits").map_err(ctx)?,
        pull_requests_merged: row.try_get("pull_requests_merged").map_err(ctx)?,
        pull_requests_rejected: row.try_get("pull_requests_rejected").map_err(ctx)?,
        code_reviews: row.try_get("code_reviews").map_err(ctx)?,
        is_enriched: row.try_get("is_enriched").map_err(ctx)?,
        is_placeholder: row.try_get("is_placeholder").map_err(ctx)?,
        is_bot: row.try_get("is_bot").map_err(ctx)?,
        enrichment_attempts: row.try_get("enrichment_attempts").map_err(ctx)?,
        created_at: row.try_get("created_at").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
    })
}

fn row_to_merge_request(row: &SqliteRow) -> Result<MergeRequest, PipelineError> {
    let ctx = |e| map_db_err("merge_requests row", e);
    let state: String = row.try_get("state").map_err(ctx)?;
    let labels: String = row.try_get("labels").map_err(ctx)?;
    Ok(MergeRequest {
        uuid: get_id(row, "uuid")?,
        provider_id: row.try_get("provider_id").map_err(ctx)?,
        repository_uuid: get_id(row, "repository_uuid")?,
        repository_provider_id: row.try_get("repository_provider_id").map_err(ctx)?,
        author_uuid: get_opt_id(row, "author_uuid")?,
        author_provider_id: row.try_get("author_provider_id").map_err(ctx)?,
        merged_by_uuid: get_opt_id(row, "merged_by_uuid")?,
        merged_by_provider_id: row.try_get("merged_by_provider_id").map_err(ctx)?,
        state: state.parse()?,
        is_draft: row.try_get("is_draft").map_err(ctx)?,
        title: row.try_get("title").map_err(ctx)?,
        body: row.try_get("body").map_err(ctx)?,
        created_at: row.try_get("created_at").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
        closed_at: row.try_get("closed_at").map_err(ctx)?,
        merged_at: row.try_get("merged_at").map_err(ctx)?,
        commits: row.try_get("commits").map_err(ctx)?,
        additions: row.try_get("additions").map_err(ctx)?,
        deletions: row.try_get("deletions").map_err(ctx)?,
        changed_files: row.try_get("changed_files").map_err(ctx)?,
        review_count: row.try_get("review_count").map_err(ctx)?,
        comment_count: row.try_get("comment_count").map_err(ctx)?,
        complexity_score: row.try_get("complexity_score").map_err(ctx)?,
        review_time_hours: row.try_get("review_time_hours").map_err(ctx)?,
        cycle_time_hours: row.try_get("cycle_time_hours").map_err(ctx)?,
        head_ref: row.try_get("head_ref").map_err(ctx)?,
        base_ref: row.try_get("base_ref").map_err(ctx)?,
        labels: decode_string_list(&labels)?,
        is_enriched: row.try_get("is_enriched").map_err(ctx)?,
        enrichment_attempts: row.try_get("enrichment_attempts").map_err(ctx)?,
        record_created_at: row.try_get("record_created_at").map_err(ctx)?,
        record_updated_at: row.try_get("record_updated_at").map_err(ctx)?,
    })
}

fn row_to_commit(row: &SqliteRow) -> Result<Commit, PipelineError> {
    let ctx = |e| map_db_err("commits row", e);
    let parent_shas: String = row.try_get("parent_shas").map_err(ctx)?;
    Ok(Commit {
        uuid: get_id(row, "uuid")?,
        provider_id: row.try_get("provider_id").map_err(ctx)?,
        repository_uuid: get_id(row, "repository_uuid")?,
        repository_provider_id: row.try_get("repository_provider_id").map_err(ctx)?,
        contributor_uuid: get_opt_id(row, "contributor_uuid")?,
        contributor_provider_id: row.try_get("contributor_provider_id").map_err(ctx)?,
        pull_request_uuid: get_opt_id(row, "pull_request_uuid")?,
        pull_request_provider_id: row.try_get("pull_request_provider_id").map_err(ctx)?,
        message: row.try_get("message").map_err(ctx)?,
        committed_at: row.try_get("committed_at").map_err(ctx)?,
        additions: row.try_get("additions").map_err(ctx)?,
        deletions: row.try_get("deletions").map_err(ctx)?,
        files_changed: row.try_get("files_changed").map_err(ctx)?,
        is_merge_commit: row.try_get("is_merge_commit").map_err(ctx)?,
        is_placeholder_author: row.try_get("is_placeholder_author").map_err(ctx)?,
        parent_shas: decode_string_list(&parent_shas)?,
        is_enriched: row.try_get("is_enriched").map_err(ctx)?,
        enrichment_attempts: row.try_get("enrichment_attempts").map_err(ctx)?,
        created_at: row.try_get("created_at").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
    })
}

fn row_to_contributor_repository(row: &SqliteRow) -> Result<ContributorRepository, PipelineError> {
    let ctx = |e| map_db_err("contributor_repositories row", e);
    Ok(ContributorRepository {
        uuid: get_id(row, "uuid")?,
        contributor_uuid: get_id(row, "contributor_uuid")?,
        contributor_provider_id: row.try_get("contributor_provider_id").map_err(ctx)?,
        repository_uuid: get_id(row, "repository_uuid")?,
        repository_provider_id: row.try_get("repository_provider_id").map_err(ctx)?,
        commit_count: row.try_get("commit_count").map_err(ctx)?,
        pull_requests: row.try_get("pull_requests").map_err(ctx)?,
        reviews: row.try_get("reviews").map_err(ctx)?,
        issues_opened: row.try_get("issues_opened").map_err(ctx)?,
        lines_added: row.try_get("lines_added").map_err(ctx)?,
        lines_removed: row.try_get("lines_removed").map_err(ctx)?,
        first_contribution_date: row.try_get("first_contribution_date").map_err(ctx)?,
        last_contribution_date: row.try_get("last_contribution_date").map_err(ctx)?,
        created_at: row.try_get("created_at").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
    })
}

fn row_to_raw(row: &SqliteRow) -> Result<RawMergeRequest, PipelineError> {
    let ctx = |e| map_db_err("raw_merge_requests row", e);
    Ok(RawMergeRequest {
        id: row.try_get("id").map_err(ctx)?,
        payload: row.try_get("payload").map_err(ctx)?,
        is_processed: row.try_get("is_processed").map_err(ctx)?,
        process_error: row.try_get("process_error").map_err(ctx)?,
        created_at: row.try_get("created_at").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
    })
}

fn row_to_ranking(row: &SqliteRow) -> Result<ContributorRanking, PipelineError> {
    let ctx = |e| map_db_err("contributor_rankings row", e);
    Ok(ContributorRanking {
        uuid: get_id(row, "uuid")?,
        contributor_uuid: get_id(row, "contributor_uuid")?,
        contributor_provider_id: row.try_get("contributor_provider_id").map_err(ctx)?,
        username: row.try_get("username").map_err(ctx)?,
        rank_position: row.try_get("rank_position").map_err(ctx)?,
        total_score: row.try_get("total_score").map_err(ctx)?,
        volume_score: row.try_get("volume_score").map_err(ctx)?,
        efficiency_score: row.try_get("efficiency_score").map_err(ctx)?,
        impact_score: row.try_get("impact_score").map_err(ctx)?,
        influence_score: row.try_get("influence_score").map_err(ctx)?,
        popularity_score: row.try_get("popularity_score").map_err(ctx)?,
        followers_score: row.try_get("followers_score").map_err(ctx)?,
        profile_completeness_score: row.try_get("profile_completeness_score").map_err(ctx)?,
        collaboration_score: row.try_get("collaboration_score").map_err(ctx)?,
        raw_lines_added: row.try_get("raw_lines_added").map_err(ctx)?,
        raw_lines_removed: row.try_get("raw_lines_removed").map_err(ctx)?,
        raw_commits: row.try_get("raw_commits").map_err(ctx)?,
        raw_merge_requests: row.try_get("raw_merge_requests").map_err(ctx)?,
        repositories_contributed: row.try_get("repositories_contributed").map_err(ctx)?,
        followers_count: row.try_get("followers_count").map_err(ctx)?,
        calculation_timestamp: row.try_get("calculation_timestamp").map_err(ctx)?,
    })
}

// ----- in-transaction upsert helpers ------------------------------------------

/// Upserts a contributor by provider id inside `tx`, returning the stable
/// uuid. `username` should already be null for placeholder identities.
async fn upsert_contributor_tx(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    provider_id: i64,
    username: Option<&str>,
    avatar_url: Option<&str>,
    is_placeholder: bool,
    is_bot: bool,
    now: DateTime<Utc>,
) -> Result<ContributorId, PipelineError> {
    let candidate = ContributorId::new();
    sqlx::query(
        r#"
        INSERT INTO contributors (
            uuid, provider_id, username, avatar_url,
            is_placeholder, is_bot, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        ON CONFLICT (provider_id) DO UPDATE SET
            username     = COALESCE(excluded.username, contributors.username),
            avatar_url   = COALESCE(excluded.avatar_url, contributors.avatar_url),
            is_bot       = excluded.is_bot,
            updated_at   = excluded.updated_at
        "#,
    )
    .bind(candidate.to_string())
    .bind(provider_id)
    .bind(username)
    .bind(avatar_url)
    .bind(is_placeholder)
    .bind(is_bot)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_db_err("upsert contributor", e))?;

    let uuid: String = sqlx::query_scalar("SELECT uuid FROM contributors WHERE provider_id = ?1")
        .bind(provider_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_db_err("resolve contributor uuid", e))?;
    uuid.parse()
}

/// Resolves a user facet to a contributor row per the placeholder policy:
/// no row for unresolvable ids, null username for sentinel logins.
async fn resolve_user_facet(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    facet: Option<&UserFacet>,
    now: DateTime<Utc>,
) -> Result<Option<(ContributorId, i64)>, PipelineError> {
    let Some(user) = facet else { return Ok(None) };
    if !user.is_resolvable() {
        return Ok(None);
    }
    let is_placeholder = user.has_sentinel_login();
    let username = if is_placeholder {
        None
    } else {
        user.login.as_deref()
    };
    let uuid = upsert_contributor_tx(
        tx,
        user.provider_id,
        username,
        user.avatar_url.as_deref(),
        is_placeholder,
        user.is_bot,
        now,
    )
    .await?;
    Ok(Some((uuid, user.provider_id)))
}

/// Same policy for provider-side user summaries (enrichment path).
async fn resolve_user_summary(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    summary: Option<&ProviderUserSummary>,
    now: DateTime<Utc>,
) -> Result<Option<(ContributorId, i64)>, PipelineError> {
    let Some(user) = summary else { return Ok(None) };
    if user.provider_id <= 0 {
        return Ok(None);
    }
    let uuid = upsert_contributor_tx(
        tx,
        user.provider_id,
        user.login.as_deref(),
        user.avatar_url.as_deref(),
        false,
        user.is_bot,
        now,
    )
    .await?;
    Ok(Some((uuid, user.provider_id)))
}

/// Widens a contributor's contribution window and bumps an activity
/// counter inside `tx`.
async fn touch_contributor_activity(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    uuid: ContributorId,
    counter_sql: &str,
    contributed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    let sql = format!(
        r#"
        UPDATE contributors SET
            {counter},
            first_contribution = CASE
                WHEN ?1 IS NULL THEN first_contribution
                WHEN first_contribution IS NULL OR first_contribution > ?1 THEN ?1
                ELSE first_contribution END,
            last_contribution = CASE
                WHEN ?1 IS NULL THEN last_contribution
                WHEN last_contribution IS NULL OR last_contribution < ?1 THEN ?1
                ELSE last_contribution END,
            updated_at = ?2
        WHERE uuid = ?3
        "#,
        counter = counter_sql
    );
    sqlx::query(&sql)
        .bind(contributed_at)
        .bind(now)
        .bind(uuid.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_db_err("update contributor activity", e))?;
    Ok(())
}

impl SqliteStore {
    /// The whole Process step for one staged payload, in one transaction.
    async fn try_apply_activity(
        &self,
        bundle: &ActivityBundle,
    ) -> Result<AppliedActivity, PipelineError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin apply_activity", e))?;

        // --- repository: facts from the payload, enriched fields preserved
        let repo = &bundle.repository;
        // Validates provider id and full name shape before any write
        let discovered = Repository::discovered(repo.provider_id, repo.full_name.clone())?;
        sqlx::query(
            r#"
            INSERT INTO repositories (
                uuid, provider_id, full_name, name, url,
                stars, forks, watchers, open_issues, size_kb,
                primary_language, default_branch, is_fork, is_archived,
                last_updated, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
            ON CONFLICT (provider_id) DO UPDATE SET
                full_name        = excluded.full_name,
                name             = excluded.name,
                url              = COALESCE(excluded.url, repositories.url),
                stars            = excluded.stars,
                forks            = excluded.forks,
                watchers         = excluded.watchers,
                open_issues      = excluded.open_issues,
                size_kb          = excluded.size_kb,
                primary_language = COALESCE(excluded.primary_language, repositories.primary_language),
                default_branch   = COALESCE(excluded.default_branch, repositories.default_branch),
                is_fork          = excluded.is_fork,
                is_archived      = excluded.is_archived,
                last_updated     = COALESCE(excluded.last_updated, repositories.last_updated),
                updated_at       = excluded.updated_at
            "#,
        )
        .bind(discovered.uuid.to_string())
        .bind(repo.provider_id)
        .bind(&repo.full_name)
        .bind(discovered.name.as_str())
        .bind(repo.url.as_deref())
        .bind(repo.stars)
        .bind(repo.forks)
        .bind(repo.watchers)
        .bind(repo.open_issues)
        .bind(repo.size_kb)
        .bind(repo.primary_language.as_deref())
        .bind(repo.default_branch.as_deref())
        .bind(repo.is_fork)
        .bind(repo.is_archived)
        .bind(repo.last_updated)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("upsert repository", e))?;

        let repository_uuid: RepositoryId =
            sqlx::query_scalar::<_, String>("SELECT uuid FROM repositories WHERE provider_id = ?1")
                .bind(repo.provider_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_db_err("resolve repository uuid", e))?
                .parse()?;

        // --- repository owner, when the event carried one
        if let Some(owner) = resolve_user_facet(&mut tx, repo.owner.as_ref(), now).await? {
            sqlx::query(
                "UPDATE repositories SET owner_uuid = ?1, owner_provider_id = ?2, updated_at = ?3 WHERE uuid = ?4",
            )
            .bind(owner.0.to_string())
            .bind(owner.1)
            .bind(now)
            .bind(repository_uuid.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("set repository owner", e))?;
        }

        // --- PR author and merger
        let pr = &bundle.pull_request;
        let author = resolve_user_facet(&mut tx, pr.author.as_ref(), now).await?;
        let merged_by = resolve_user_facet(&mut tx, pr.merged_by.as_ref(), now).await?;
        let had_placeholder_author = author.is_none();

        // --- merge request keyed by (repository_uuid, number)
        let state = if pr.merged_at.is_some() {
            MergeRequestState::Merged
        } else {
            pr.state
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(MergeRequestState::Merged)
        };
        let mr_candidate = MergeRequest::extracted(
            pr.number,
            repository_uuid,
            repo.provider_id,
            pr.title.clone(),
        )?;
        sqlx::query(
            r#"
            INSERT INTO merge_requests (
                uuid, provider_id, repository_uuid, repository_provider_id,
                author_uuid, author_provider_id, merged_by_uuid, merged_by_provider_id,
                state, is_draft, title, body,
                created_at, updated_at, closed_at, merged_at,
                commits, additions, deletions, changed_files, review_count, comment_count,
                head_ref, base_ref, labels,
                record_created_at, record_updated_at
            )
            VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22,
                ?23, ?24, ?25, ?26, ?26
            )
            ON CONFLICT (repository_uuid, provider_id) DO UPDATE SET
                repository_provider_id = excluded.repository_provider_id,
                author_uuid            = COALESCE(excluded.author_uuid, merge_requests.author_uuid),
                author_provider_id     = COALESCE(excluded.author_provider_id, merge_requests.author_provider_id),
                merged_by_uuid         = COALESCE(excluded.merged_by_uuid, merge_requests.merged_by_uuid),
                merged_by_provider_id  = COALESCE(excluded.merged_by_provider_id, merge_requests.merged_by_provider_id),
                state                  = excluded.state,
                is_draft               = excluded.is_draft,
                title                  = excluded.title,
                body                   = COALESCE(excluded.body, merge_requests.body),
                created_at             = COALESCE(excluded.created_at, merge_requests.created_at),
                updated_at             = COALESCE(excluded.updated_at, merge_requests.updated_at),
                closed_at              = COALESCE(excluded.closed_at, merge_requests.closed_at),
                merged_at              = COALESCE(excluded.merged_at, merge_requests.merged_at),
                commits                = excluded.commits,
                additions              = excluded.additions,
                deletions              = excluded.deletions,
                changed_files          = excluded.changed_files,
                review_count           = excluded.review_count,
                comment_count          = excluded.comment_count,
                head_ref               = COALESCE(excluded.head_ref, merge_requests.head_ref),
                base_ref               = COALESCE(excluded.base_ref, merge_requests.base_ref),
                labels                 = excluded.labels,
                record_updated_at      = excluded.record_updated_at
            "#,
        )
        .bind(mr_candidate.uuid.to_string())
        .bind(pr.number)
        .bind(repository_uuid.to_string())
        .bind(repo.provider_id)
        .bind(author.map(|(uuid, _)| uuid.to_string()))
        .bind(author.map(|(_, provider_id)| provider_id))
        .bind(merged_by.map(|(uuid, _)| uuid.to_string()))
        .bind(merged_by.map(|(_, provider_id)| provider_id))
        .bind(state.as_str())
        .bind(pr.is_draft)
        .bind(&pr.title)
        .bind(pr.body.as_deref())
        .bind(pr.created_at)
        .bind(pr.updated_at)
        .bind(pr.closed_at)
        .bind(pr.merged_at)
        .bind(pr.commits.max(bundle.commits.len() as i64))
        .bind(pr.additions)
        .bind(pr.deletions)
        .bind(pr.changed_files)
        .bind(pr.review_count)
        .bind(pr.comment_count)
        .bind(pr.head_ref.as_deref())
        .bind(pr.base_ref.as_deref())
        .bind(encode_string_list(&pr.labels)?)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("upsert merge request", e))?;

        let merge_request_uuid: MergeRequestId = sqlx::query_scalar::<_, String>(
            "SELECT uuid FROM merge_requests WHERE repository_uuid = ?1 AND provider_id = ?2",
        )
        .bind(repository_uuid.to_string())
        .bind(pr.number)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_err("resolve merge request uuid", e))?
        .parse()?;

        // --- commits
        let mut commits_upserted = 0u64;
        let mut commit_lines_added = 0i64;
        let mut commit_lines_removed = 0i64;
        for commit in &bundle.commits {
            if commit.sha.is_empty() {
                continue;
            }
            let commit_author = resolve_user_facet(&mut tx, commit.author.as_ref(), now).await?;
            let candidate = Commit::extracted(commit.sha.clone(), repository_uuid, repo.provider_id)?;
            sqlx::query(
                r#"
                INSERT INTO commits (
                    uuid, provider_id, repository_uuid, repository_provider_id,
                    contributor_uuid, contributor_provider_id,
                    pull_request_uuid, pull_request_provider_id,
                    message, committed_at, additions, deletions, files_changed,
                    is_merge_commit, is_placeholder_author, parent_shas,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
                ON CONFLICT (repository_uuid, provider_id) DO UPDATE SET
                    contributor_uuid         = COALESCE(excluded.contributor_uuid, commits.contributor_uuid),
                    contributor_provider_id  = COALESCE(excluded.contributor_provider_id, commits.contributor_provider_id),
                    pull_request_uuid        = COALESCE(excluded.pull_request_uuid, commits.pull_request_uuid),
                    pull_request_provider_id = COALESCE(excluded.pull_request_provider_id, commits.pull_request_provider_id),
                    message                  = excluded.message,
                    committed_at             = COALESCE(excluded.committed_at, commits.committed_at),
                    additions                = excluded.additions,
                    deletions                = excluded.deletions,
                    files_changed            = excluded.files_changed,
                    is_merge_commit          = excluded.is_merge_commit,
                    is_placeholder_author    = excluded.is_placeholder_author,
                    parent_shas              = excluded.parent_shas,
                    updated_at               = excluded.updated_at
                "#,
            )
            .bind(candidate.uuid.to_string())
            .bind(&commit.sha)
            .bind(repository_uuid.to_string())
            .bind(repo.provider_id)
            .bind(commit_author.map(|(uuid, _)| uuid.to_string()))
            .bind(commit_author.map(|(_, provider_id)| provider_id))
            .bind(merge_request_uuid.to_string())
            .bind(pr.number)
            .bind(&commit.message)
            .bind(commit.committed_at)
            .bind(commit.additions)
            .bind(commit.deletions)
            .bind(commit.files_changed)
            .bind(commit.is_merge())
            .bind(commit_author.is_none())
            .bind(encode_string_list(&commit.parent_shas)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("upsert commit", e))?;

            commits_upserted += 1;
            commit_lines_added += commit.additions;
            commit_lines_removed += commit.deletions;

            if let Some((commit_author_uuid, _)) = commit_author {
                touch_contributor_activity(
                    &mut tx,
                    commit_author_uuid,
                    "direct_commits = direct_commits + 1",
                    commit.committed_at,
                    now,
                )
                .await?;
            }
        }

        // --- junction fold for the PR author, PR pass + commit pass
        if let Some((author_uuid, author_provider_id)) = author {
            let link = ContributorRepository::new_link(
                author_uuid,
                author_provider_id,
                repository_uuid,
                repo.provider_id,
            );
            let contributed_at = pr.merged_at.or(pr.created_at);
            sqlx::query(
                r#"
                INSERT INTO contributor_repositories (
                    uuid, contributor_uuid, contributor_provider_id,
                    repository_uuid, repository_provider_id,
                    commit_count, pull_requests, lines_added, lines_removed,
                    first_contribution_date, last_contribution_date,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11, ?11)
                ON CONFLICT (contributor_uuid, repository_uuid) DO UPDATE SET
                    commit_count  = contributor_repositories.commit_count + excluded.commit_count,
                    pull_requests = contributor_repositories.pull_requests + excluded.pull_requests,
                    lines_added   = contributor_repositories.lines_added + excluded.lines_added,
                    lines_removed = contributor_repositories.lines_removed + excluded.lines_removed,
                    first_contribution_date = CASE
                        WHEN excluded.first_contribution_date IS NULL THEN contributor_repositories.first_contribution_date
                        WHEN contributor_repositories.first_contribution_date IS NULL
                            OR contributor_repositories.first_contribution_date > excluded.first_contribution_date
                            THEN excluded.first_contribution_date
                        ELSE contributor_repositories.first_contribution_date END,
                    last_contribution_date = CASE
                        WHEN excluded.last_contribution_date IS NULL THEN contributor_repositories.last_contribution_date
                        WHEN contributor_repositories.last_contribution_date IS NULL
                            OR contributor_repositories.last_contribution_date < excluded.last_contribution_date
                            THEN excluded.last_contribution_date
                        ELSE contributor_repositories.last_contribution_date END,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(link.uuid.to_string())
            .bind(author_uuid.to_string())
            .bind(author_provider_id)
            .bind(repository_uuid.to_string())
            .bind(repo.provider_id)
            .bind(commits_upserted as i64)
            .bind(1i64)
            .bind(pr.additions + commit_lines_added)
            .bind(pr.deletions + commit_lines_removed)
            .bind(contributed_at)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("fold contributor_repositories", e))?;

            touch_contributor_activity(
                &mut tx,
                author_uuid,
                "pull_requests_merged = pull_requests_merged + 1",
                contributed_at,
                now,
            )
            .await?;
        }

        // --- flip the processed gate inside the same transaction
        sqlx::query(
            "UPDATE raw_merge_requests SET is_processed = 1, process_error = NULL, updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(bundle.raw_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("mark raw processed", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit apply_activity", e))?;

        Ok(AppliedActivity {
            repository_uuid,
            merge_request_uuid,
            author_uuid: author.map(|(uuid, _)| uuid),
            commits_upserted,
            had_placeholder_author,
        })
    }

    async fn select_unenriched(
        &self,
        table: &str,
        order_column: &str,
        limit: u32,
        max_attempts: i64,
        extra_filter: &str,
    ) -> Result<Vec<SqliteRow>, PipelineError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE is_enriched = 0 AND enrichment_attempts < ?1 {extra} \
             ORDER BY {order}, provider_id LIMIT ?2",
            table = table,
            extra = extra_filter,
            order = order_column,
        );
        sqlx::query(&sql)
            .bind(max_attempts)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("select unenriched", e))
    }

    fn enrichable_table(kind: EnrichableKind) -> &'static str {
        match kind {
            EnrichableKind::Repository => "repositories",
            EnrichableKind::Contributor => "contributors",
            EnrichableKind::MergeRequest => "merge_requests",
            EnrichableKind::Commit => "commits",
        }
    }

    fn enrichable_updated_column(kind: EnrichableKind) -> &'static str {
        match kind {
            EnrichableKind::MergeRequest => "record_updated_at",
            _ => "updated_at",
        }
    }
}

// ----- EntityRepository -------------------------------------------------------

#[async_trait]
impl EntityRepository for SqliteStore {
    async fn apply_activity(&self, bundle: &ActivityBundle) -> Result<AppliedActivity, PipelineError> {
        with_busy_retry("apply_activity", || self.try_apply_activity(bundle)).await
    }

    async fn unenriched_repositories(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<Repository>, PipelineError> {
        self.select_unenriched("repositories", "created_at", limit, max_attempts, "")
            .await?
            .iter()
            .map(row_to_repository)
            .collect()
    }

    async fn unenriched_contributors(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<Contributor>, PipelineError> {
        self.select_unenriched(
            "contributors",
            "created_at",
            limit,
            max_attempts,
            "AND is_placeholder = 0",
        )
        .await?
        .iter()
        .map(row_to_contributor)
        .collect()
    }

    async fn unenriched_merge_requests(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<MergeRequest>, PipelineError> {
        self.select_unenriched("merge_requests", "record_created_at", limit, max_attempts, "")
            .await?
            .iter()
            .map(row_to_merge_request)
            .collect()
    }

    async fn unenriched_commits(
        &self,
        limit: u32,
        max_attempts: i64,
    ) -> Result<Vec<Commit>, PipelineError> {
        self.select_unenriched("commits", "created_at", limit, max_attempts, "")
            .await?
            .iter()
            .map(row_to_commit)
            .collect()
    }

    async fn retire_unenrichable_contributors(&self) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            "UPDATE contributors SET is_enriched = 1, updated_at = ?1 \
             WHERE is_enriched = 0 AND (is_placeholder = 1 OR provider_id <= 0)",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("retire unenrichable contributors", e))?;
        Ok(result.rows_affected())
    }

    async fn apply_repository_enrichment(
        &self,
        uuid: RepositoryId,
        detail: &ProviderRepository,
    ) -> Result<(), PipelineError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin repository enrichment", e))?;

        let owner = resolve_user_summary(&mut tx, detail.owner.as_ref(), now).await?;

        sqlx::query(
            r#"
            UPDATE repositories SET
                full_name         = ?1,
                name              = ?2,
                url               = COALESCE(?3, url),
                description       = COALESCE(?4, description),
                stars             = ?5,
                forks             = ?6,
                watchers          = ?7,
                open_issues       = ?8,
                size_kb           = ?9,
                primary_language  = COALESCE(?10, primary_language),
                default_branch    = COALESCE(?11, default_branch),
                is_fork           = ?12,
                is_archived       = ?13,
                owner_uuid        = COALESCE(?14, owner_uuid),
                owner_provider_id = COALESCE(?15, owner_provider_id),
                last_updated      = COALESCE(?16, last_updated),
                is_enriched       = 1,
                enrichment_attempts = enrichment_attempts + 1,
                updated_at        = ?17
            WHERE uuid = ?18
            "#,
        )
        .bind(&detail.full_name)
        .bind(&detail.name)
        .bind(detail.url.as_deref())
        .bind(detail.description.as_deref())
        .bind(detail.stars)
        .bind(detail.forks)
        .bind(detail.watchers)
        .bind(detail.open_issues)
        .bind(detail.size_kb)
        .bind(detail.primary_language.as_deref())
        .bind(detail.default_branch.as_deref())
        .bind(detail.is_fork)
        .bind(detail.is_archived)
        .bind(owner.map(|(id, _)| id.to_string()))
        .bind(owner.map(|(_, provider_id)| provider_id))
        .bind(detail.pushed_at)
        .bind(now)
        .bind(uuid.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("apply repository enrichment", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit repository enrichment", e))
    }

    async fn apply_contributor_enrichment(
        &self,
        uuid: ContributorId,
        detail: &ProviderUser,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE contributors SET
                username     = COALESCE(?1, username),
                name         = COALESCE(?2, name),
                avatar_url   = COALESCE(?3, avatar_url),
                bio          = COALESCE(?4, bio),
                company      = COALESCE(?5, company),
                blog         = COALESCE(?6, blog),
                twitter      = COALESCE(?7, twitter),
                location     = COALESCE(?8, location),
                followers    = ?9,
                public_repos = ?10,
                is_bot       = ?11,
                is_enriched  = 1,
                enrichment_attempts = enrichment_attempts + 1,
                updated_at   = ?12
            WHERE uuid = ?13
            "#,
        )
        .bind(detail.login.as_deref())
        .bind(detail.name.as_deref())
        .bind(detail.avatar_url.as_deref())
        .bind(detail.bio.as_deref())
        .bind(detail.company.as_deref())
        .bind(detail.blog.as_deref())
        .bind(detail.twitter.as_deref())
        .bind(detail.location.as_deref())
        .bind(detail.followers)
        .bind(detail.public_repos)
        .bind(detail.is_bot)
        .bind(Utc::now())
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("apply contributor enrichment", e))?;
        Ok(())
    }

    async fn apply_merge_request_enrichment(
        &self,
        uuid: MergeRequestId,
        detail: &ProviderPullRequest,
    ) -> Result<(), PipelineError> {
        // Derived analytics computed from the detail's timestamps and size
        let cycle_time_hours = match (detail.created_at, detail.merged_at) {
            (Some(created), Some(merged)) if merged >= created => {
                Some((merged - created).num_seconds() as f64 / 3600.0)
            }
            _ => None,
        };
        let review_time_hours = match (detail.created_at, detail.closed_at) {
            (Some(created), Some(closed)) if closed >= created => {
                Some((closed - created).num_seconds() as f64 / 3600.0)
            }
            _ => None,
        };
        // Bounded size-based heuristic: grows with churn and breadth, capped
        // at 100.
        let churn = (detail.additions + detail.deletions) as f64;
        let complexity_score =
            (churn.ln_1p() * 10.0 + (detail.changed_files as f64).ln_1p() * 5.0).min(100.0);

        sqlx::query(
            r#"
            UPDATE merge_requests SET
                title             = ?1,
                body              = COALESCE(?2, body),
                state             = ?3,
                is_draft          = ?4,
                created_at        = COALESCE(?5, created_at),
                updated_at        = COALESCE(?6, updated_at),
                closed_at         = COALESCE(?7, closed_at),
                merged_at         = COALESCE(?8, merged_at),
                commits           = ?9,
                additions         = ?10,
                deletions         = ?11,
                changed_files     = ?12,
                review_count      = ?13,
                comment_count     = ?14,
                complexity_score  = ?15,
                review_time_hours = ?16,
                cycle_time_hours  = ?17,
                head_ref          = COALESCE(?18, head_ref),
                base_ref          = COALESCE(?19, base_ref),
                labels            = ?20,
                is_enriched       = 1,
                enrichment_attempts = enrichment_attempts + 1,
                record_updated_at = ?21
            WHERE uuid = ?22
            "#,
        )
        .bind(&detail.title)
        .bind(detail.body.as_deref())
        .bind(if detail.merged_at.is_some() {
            "merged"
        } else {
            detail.state.as_deref().unwrap_or("closed")
        })
        .bind(detail.is_draft)
        .bind(detail.created_at)
        .bind(detail.updated_at)
        .bind(detail.closed_at)
        .bind(detail.merged_at)
        .bind(detail.commits)
        .bind(detail.additions)
        .bind(detail.deletions)
        .bind(detail.changed_files)
        .bind(detail.review_count)
        .bind(detail.comment_count)
        .bind(complexity_score)
        .bind(review_time_hours)
        .bind(cycle_time_hours)
        .bind(detail.head_ref.as_deref())
        .bind(detail.base_ref.as_deref())
        .bind(encode_string_list(&detail.labels)?)
        .bind(Utc::now())
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("apply merge request enrichment", e))?;
        Ok(())
    }

    async fn apply_commit_enrichment(
        &self,
        uuid: Uuid,
        detail: &ProviderCommit,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE commits SET
                message       = ?1,
                committed_at  = COALESCE(?2, committed_at),
                additions     = ?3,
                deletions     = ?4,
                files_changed = ?5,
                parent_shas   = ?6,
                is_merge_commit = ?7,
                is_enriched   = 1,
                enrichment_attempts = enrichment_attempts + 1,
                updated_at    = ?8
            WHERE uuid = ?9
            "#,
        )
        .bind(&detail.message)
        .bind(detail.committed_at)
        .bind(detail.additions)
        .bind(detail.deletions)
        .bind(detail.files_changed)
        .bind(encode_string_list(&detail.parent_shas)?)
        .bind(detail.parent_shas.len() > 1)
        .bind(Utc::now())
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("apply commit enrichment", e))?;
        Ok(())
    }

    async fn mark_enriched_not_found(
        &self,
        kind: EnrichableKind,
        uuid: Uuid,
    ) -> Result<(), PipelineError> {
        let sql = format!(
            "UPDATE {table} SET is_enriched = 1, enrichment_attempts = enrichment_attempts + 1, \
             {updated} = ?1 WHERE uuid = ?2",
            table = Self::enrichable_table(kind),
            updated = Self::enrichable_updated_column(kind),
        );
        sqlx::query(&sql)
            .bind(Utc::now())
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("mark enriched (not found)", e))?;
        Ok(())
    }

    async fn record_enrichment_failure(
        &self,
        kind: EnrichableKind,
        uuid: Uuid,
    ) -> Result<(), PipelineError> {
        let sql = format!(
            "UPDATE {table} SET enrichment_attempts = enrichment_attempts + 1, {updated} = ?1 \
             WHERE uuid = ?2",
            table = Self::enrichable_table(kind),
            updated = Self::enrichable_updated_column(kind),
        );
        sqlx::query(&sql)
            .bind(Utc::now())
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("record enrichment failure", e))?;
        Ok(())
    }

    async fn find_repository_by_provider_id(
        &self,
        provider_id: i64,
    ) -> Result<Option<Repository>, PipelineError> {
        sqlx::query("SELECT * FROM repositories WHERE provider_id = ?1")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("find repository by provider id", e))?
            .as_ref()
            .map(row_to_repository)
            .transpose()
    }

    async fn find_repository_by_uuid(
        &self,
        uuid: RepositoryId,
    ) -> Result<Option<Repository>, PipelineError> {
        sqlx::query("SELECT * FROM repositories WHERE uuid = ?1")
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("find repository by uuid", e))?
            .as_ref()
            .map(row_to_repository)
            .transpose()
    }

    async fn find_contributor_by_provider_id(
        &self,
        provider_id: i64,
    ) -> Result<Option<Contributor>, PipelineError> {
        sqlx::query("SELECT * FROM contributors WHERE provider_id = ?1")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("find contributor by provider id", e))?
            .as_ref()
            .map(row_to_contributor)
            .transpose()
    }

    async fn find_merge_request(
        &self,
        repository_uuid: RepositoryId,
        number: i64,
    ) -> Result<Option<MergeRequest>, PipelineError> {
        sqlx::query("SELECT * FROM merge_requests WHERE repository_uuid = ?1 AND provider_id = ?2")
            .bind(repository_uuid.to_string())
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("find merge request", e))?
            .as_ref()
            .map(row_to_merge_request)
            .transpose()
    }

    async fn commits_for_merge_request(
        &self,
        merge_request_uuid: MergeRequestId,
    ) -> Result<Vec<Commit>, PipelineError> {
        sqlx::query("SELECT * FROM commits WHERE pull_request_uuid = ?1 ORDER BY created_at, provider_id")
            .bind(merge_request_uuid.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("commits for merge request", e))?
            .iter()
            .map(row_to_commit)
            .collect()
    }

    async fn find_contributor_repository(
        &self,
        contributor_uuid: ContributorId,
        repository_uuid: RepositoryId,
    ) -> Result<Option<ContributorRepository>, PipelineError> {
        sqlx::query(
            "SELECT * FROM contributor_repositories WHERE contributor_uuid = ?1 AND repository_uuid = ?2",
        )
        .bind(contributor_uuid.to_string())
        .bind(repository_uuid.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("find contributor repository", e))?
        .as_ref()
        .map(row_to_contributor_repository)
        .transpose()
    }

    async fn entity_counts(&self) -> Result<EntityCounts, PipelineError> {
        let count = |sql: &'static str| async move {
            sqlx::query_scalar::<_, i64>(sql)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_db_err("entity counts", e))
        };
        Ok(EntityCounts {
            repositories: count("SELECT COUNT(*) FROM repositories").await? as u64,
            contributors: count("SELECT COUNT(*) FROM contributors").await? as u64,
            merge_requests: count("SELECT COUNT(*) FROM merge_requests").await? as u64,
            commits: count("SELECT COUNT(*) FROM commits").await? as u64,
            contributor_repositories: count("SELECT COUNT(*) FROM contributor_repositories").await?
                as u64,
        })
    }
}

// ----- RawActivityRepository --------------------------------------------------

#[async_trait]
impl RawActivityRepository for SqliteStore {
    async fn upsert_raw(
        &self,
        pull_request_provider_id: i64,
        payload_json: &str,
    ) -> Result<RawUpsertOutcome, PipelineError> {
        with_busy_retry("upsert_raw", || async {
            let now = Utc::now();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_db_err("begin upsert_raw", e))?;

            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM raw_merge_requests WHERE pull_request_provider_id = ?1",
            )
            .bind(pull_request_provider_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_err("select raw by staging key", e))?;

            let outcome = match existing {
                Some(id) => {
                    sqlx::query(
                        "UPDATE raw_merge_requests SET payload = ?1, updated_at = ?2 WHERE id = ?3",
                    )
                    .bind(payload_json)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_db_err("update raw payload", e))?;
                    RawUpsertOutcome::Updated(id)
                }
                None => {
                    let result = sqlx::query(
                        "INSERT INTO raw_merge_requests \
                         (pull_request_provider_id, payload, is_processed, created_at, updated_at) \
                         VALUES (?1, ?2, 0, ?3, ?3)",
                    )
                    .bind(pull_request_provider_id)
                    .bind(payload_json)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_db_err("insert raw payload", e))?;
                    RawUpsertOutcome::Inserted(result.last_insert_rowid())
                }
            };

            tx.commit()
                .await
                .map_err(|e| map_db_err("commit upsert_raw", e))?;
            Ok(outcome)
        })
        .await
    }

    async fn unprocessed(&self, limit: u32) -> Result<Vec<RawMergeRequest>, PipelineError> {
        sqlx::query("SELECT * FROM raw_merge_requests WHERE is_processed = 0 ORDER BY id LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("select unprocessed raw", e))?
            .iter()
            .map(row_to_raw)
            .collect()
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, PipelineError> {
        let mut changed = 0u64;
        for id in ids {
            let result = sqlx::query(
                "UPDATE raw_merge_requests SET is_processed = 1, updated_at = ?1 \
                 WHERE id = ?2 AND is_processed = 0",
            )
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("mark raw processed", e))?;
            changed += result.rows_affected();
        }
        Ok(changed)
    }

    async fn mark_processed_with_error(&self, id: i64, reason: &str) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE raw_merge_requests SET is_processed = 1, process_error = ?1, updated_at = ?2 \
             WHERE id = ?3",
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("mark raw processed with error", e))?;
        Ok(())
    }

    async fn count_unprocessed(&self) -> Result<u64, PipelineError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM raw_merge_requests WHERE is_processed = 0")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_db_err("count unprocessed raw", e))?;
        Ok(count as u64)
    }

    async fn count_all(&self) -> Result<u64, PipelineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_merge_requests")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_err("count raw", e))?;
        Ok(count as u64)
    }
}

// ----- RankingRepository ------------------------------------------------------

#[async_trait]
impl RankingRepository for SqliteStore {
    async fn collect_contributor_metrics(&self) -> Result<Vec<ContributorMetrics>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.uuid                      AS contributor_uuid,
                c.provider_id               AS contributor_provider_id,
                c.username                  AS username,
                c.followers                 AS followers,
                COALESCE(SUM(CASE WHEN r.is_fork = 0 THEN cr.lines_added   ELSE 0 END), 0) AS lines_added,
                COALESCE(SUM(CASE WHEN r.is_fork = 0 THEN cr.lines_removed ELSE 0 END), 0) AS lines_removed,
                COALESCE(SUM(CASE WHEN r.is_fork = 0 THEN cr.commit_count  ELSE 0 END), 0) AS commit_count,
                COALESCE(SUM(CASE WHEN r.is_fork = 0 THEN cr.pull_requests ELSE 0 END), 0) AS merge_request_count,
                COALESCE(SUM(CASE WHEN r.is_fork = 0 THEN cr.reviews       ELSE 0 END), 0) AS review_count,
                COUNT(DISTINCT CASE WHEN r.is_fork = 0 THEN cr.repository_uuid END)        AS repositories_contributed,
                (CASE WHEN c.name       IS NOT NULL AND c.name       != '' THEN 1 ELSE 0 END) +
                (CASE WHEN c.bio        IS NOT NULL AND c.bio        != '' THEN 1 ELSE 0 END) +
                (CASE WHEN c.company    IS NOT NULL AND c.company    != '' THEN 1 ELSE 0 END) +
                (CASE WHEN c.blog       IS NOT NULL AND c.blog       != '' THEN 1 ELSE 0 END) +
                (CASE WHEN c.location   IS NOT NULL AND c.location   != '' THEN 1 ELSE 0 END) +
                (CASE WHEN c.avatar_url IS NOT NULL AND c.avatar_url != '' THEN 1 ELSE 0 END) AS profile_fields_filled
            FROM contributors c
            LEFT JOIN contributor_repositories cr ON cr.contributor_uuid = c.uuid
            LEFT JOIN repositories r ON r.uuid = cr.repository_uuid
            WHERE c.is_placeholder = 0
            GROUP BY c.uuid, c.provider_id, c.username, c.followers,
                     c.name, c.bio, c.company, c.blog, c.location, c.avatar_url
            ORDER BY c.provider_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("collect contributor metrics", e))?;

        rows.iter()
            .map(|row| {
                let ctx = |e| map_db_err("contributor metrics row", e);
                Ok(ContributorMetrics {
                    contributor_uuid: get_id(row, "contributor_uuid")?,
                    contributor_provider_id: row.try_get("contributor_provider_id").map_err(ctx)?,
                    username: row.try_get("username").map_err(ctx)?,
                    followers: row.try_get("followers").map_err(ctx)?,
                    lines_added: row.try_get("lines_added").map_err(ctx)?,
                    lines_removed: row.try_get("lines_removed").map_err(ctx)?,
                    commit_count: row.try_get("commit_count").map_err(ctx)?,
                    merge_request_count: row.try_get("merge_request_count").map_err(ctx)?,
                    review_count: row.try_get("review_count").map_err(ctx)?,
                    repositories_contributed: row.try_get("repositories_contributed").map_err(ctx)?,
                    profile_fields_filled: row.try_get("profile_fields_filled").map_err(ctx)?,
                })
            })
            .collect()
    }

    async fn insert_snapshot(
        &self,
        rows: &[ContributorRanking],
        calculated_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        with_busy_retry("insert_snapshot", || async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_db_err("begin snapshot", e))?;

            for row in rows {
                sqlx::query(
                    r#"
                    INSERT INTO contributor_rankings (
                        uuid, contributor_uuid, contributor_provider_id, username,
                        rank_position, total_score,
                        volume_score, efficiency_score, impact_score, influence_score,
                        popularity_score, followers_score, profile_completeness_score,
                        collaboration_score,
                        raw_lines_added, raw_lines_removed, raw_commits, raw_merge_requests,
                        repositories_contributed, followers_count,
                        calculation_timestamp
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                            ?15, ?16, ?17, ?18, ?19, ?20, ?21)
                    "#,
                )
                .bind(row.uuid.to_string())
                .bind(row.contributor_uuid.to_string())
                .bind(row.contributor_provider_id)
                .bind(row.username.as_deref())
                .bind(row.rank_position)
                .bind(row.total_score)
                .bind(row.volume_score)
                .bind(row.efficiency_score)
                .bind(row.impact_score)
                .bind(row.influence_score)
                .bind(row.popularity_score)
                .bind(row.followers_score)
                .bind(row.profile_completeness_score)
                .bind(row.collaboration_score)
                .bind(row.raw_lines_added)
                .bind(row.raw_lines_removed)
                .bind(row.raw_commits)
                .bind(row.raw_merge_requests)
                .bind(row.repositories_contributed)
                .bind(row.followers_count)
                .bind(calculated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_db_err("insert ranking row", e))?;
            }

            tx.commit()
                .await
                .map_err(|e| map_db_err("commit snapshot", e))
        })
        .await
    }

    async fn latest_snapshot(&self) -> Result<Vec<ContributorRanking>, PipelineError> {
        sqlx::query(
            "SELECT * FROM contributor_rankings \
             WHERE calculation_timestamp = (SELECT MAX(calculation_timestamp) FROM contributor_rankings) \
             ORDER BY rank_position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("latest snapshot", e))?
        .iter()
        .map(row_to_ranking)
        .collect()
    }
}
