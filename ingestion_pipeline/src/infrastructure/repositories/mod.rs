// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Embedded-store implementations: schema management, the entity store,
//! and the job store.

use once_cell::sync::OnceCell;

use ingestion_pipeline_domain::error::PipelineError;

pub mod schema;
pub mod sqlite_job_store;
pub mod sqlite_store;

pub use sqlite_job_store::SqliteJobStore;
pub use sqlite_store::SqliteStore;

static GLOBAL_STORE: OnceCell<SqliteStore> = OnceCell::new();

/// Process-wide store handle, lazily opened on first use. Handles are
/// cheap clones of one pool; the pool validates connections before reuse
/// and reopens an invalidated connection transparently.
pub async fn shared_store(path: &str) -> Result<SqliteStore, PipelineError> {
    if let Some(store) = GLOBAL_STORE.get() {
        return Ok(store.clone());
    }
    let opened = SqliteStore::open(path).await?;
    Ok(GLOBAL_STORE.get_or_init(|| opened).clone())
}
