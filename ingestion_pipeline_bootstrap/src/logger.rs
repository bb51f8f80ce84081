// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Tracing initialization for the pipeline binaries.
//!
//! The configured `LOG_LEVEL` becomes the default directive; `RUST_LOG`
//! still wins when set, so operators can raise verbosity per target without
//! touching the service configuration.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// `level` is a tracing filter directive, usually just a level name
/// (`info`, `debug`) but full `target=level` syntax is accepted. Returns an
/// error if a subscriber is already installed.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    Ok(())
}

/// Initializes tracing for tests; repeated calls are a no-op.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}
