// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Signal handling: SIGINT / SIGTERM initiate the graceful shutdown
//! sequence. On non-Unix targets only Ctrl-C is wired.

use tokio::task::JoinHandle;

use crate::shutdown::ShutdownCoordinator;

/// Resolves when the process receives a termination signal.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                // Fall back to Ctrl-C only
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl-C");
    }
}

/// Spawns a listener that initiates shutdown on the first termination
/// signal.
pub fn spawn_signal_listener(coordinator: ShutdownCoordinator) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        coordinator.initiate_shutdown();
    })
}
