// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! SQLite schema helpers shared by the store implementations.
//!
//! Applies migrations on start-up so integration tests and services see a
//! consistent database. Connection options encode the durability contract:
//! WAL journaling, NORMAL synchronous (survives process crashes, not
//! hardware loss), foreign keys enforced, and a busy timeout under the
//! store's own bounded retry.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use tracing::{debug, info};

use ingestion_pipeline_domain::error::PipelineError;

/// Busy timeout handed to SQLite before the store's own retry loop kicks in.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs pending migrations against the provided SQLite pool.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), PipelineError> {
    debug!("ensuring database schema is up to date");

    // sqlx tracks applied migrations in its own table; each DDL step is
    // written idempotently as well.
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .map_err(|e| PipelineError::database_error(format!("migration failed: {}", e)))?;

    info!("database schema is up to date");
    Ok(())
}

/// Connection options for a file-backed store at `path`.
pub fn file_connect_options(path: &str) -> Result<SqliteConnectOptions, PipelineError> {
    Ok(SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
        .map_err(|e| PipelineError::invalid_config(format!("invalid database path '{}': {}", path, e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT))
}

/// Opens (creating if missing) the store file at `path` and brings the
/// schema up to date. One writer at a time is supported; the single
/// connection serializes writes in-process.
pub async fn initialize_database(path: &str) -> Result<SqlitePool, PipelineError> {
    let options = file_connect_options(path)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| {
            PipelineError::database_error(format!("failed to open database '{}': {}", path, e))
        })?;

    ensure_schema(&pool).await?;
    Ok(pool)
}

/// An in-memory store for tests. The pool is pinned to a single connection
/// that never expires, because each SQLite `:memory:` connection is its own
/// database.
pub async fn in_memory_pool() -> Result<SqlitePool, PipelineError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| PipelineError::database_error(e.to_string()))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| {
            PipelineError::database_error(format!("failed to open in-memory database: {}", e))
        })?;

    ensure_schema(&pool).await?;
    Ok(pool)
}
