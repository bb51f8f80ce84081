// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! Cancellation tokens and the graceful-shutdown sequence. On a shutdown
//! signal the orchestrator stops accepting schedule ticks, cancels the root
//! token, and waits up to a grace period for running stages to close their
//! history rows as `stopped`; after the grace period the process terminates
//! and the next start repairs whatever was left dangling.
//!
//! Tokens are built on `tokio::sync::watch`, so a waiter registered after
//! cancellation still observes it - there is no lost-wakeup window between
//! checking the flag and parking.
//!
//! ## Usage
//!
//! ```rust
//! use ingestion_pipeline_bootstrap::shutdown::ShutdownCoordinator;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
//!     let token = coordinator.token();
//!
//!     tokio::spawn(async move {
//!         tokio::select! {
//!             _ = token.cancelled() => { /* wind down */ }
//!             _ = tokio::time::sleep(Duration::from_secs(1)) => { /* work */ }
//!         }
//!     });
//!
//!     coordinator.initiate_shutdown();
//!     coordinator.wait_for_shutdown().await;
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Default grace period for graceful shutdown (in seconds)
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// Clone-able cancellation token handed to every long-lived task.
#[derive(Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Creates a fresh, uncancelled token
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancels this token and every clone of it
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Checks cancellation without blocking
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Waits until the token is cancelled. Returns immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // wait_for observes the current value first, so a token cancelled
        // before this call returns immediately.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinates graceful shutdown: one root token, a grace period, and a
/// completion handshake from the application side.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace_period: Duration,
    complete_tx: Arc<watch::Sender<bool>>,
    complete_rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with the given grace period
    pub fn new(grace_period: Duration) -> Self {
        let (complete_tx, complete_rx) = watch::channel(false);
        Self {
            token: CancellationToken::new(),
            grace_period,
            complete_tx: Arc::new(complete_tx),
            complete_rx,
        }
    }

    /// A token bound to this coordinator's lifetime
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the root token, signalling every holder to wind down
    pub fn initiate_shutdown(&self) {
        if !self.token.is_cancelled() {
            tracing::info!(grace_period = ?self.grace_period, "initiating graceful shutdown");
            self.token.cancel();
        }
    }

    /// Signals that application cleanup finished
    pub fn complete_shutdown(&self) {
        self.complete_tx.send_replace(true);
    }

    /// Waits for `complete_shutdown` or the grace period, whichever comes
    /// first. Returns `true` when shutdown completed within the grace
    /// period.
    pub async fn wait_for_shutdown(&self) -> bool {
        let mut complete = self.complete_rx.clone();
        tokio::select! {
            _ = complete.wait_for(|done| *done) => {
                tracing::info!("shutdown completed gracefully");
                true
            }
            _ = tokio::time::sleep(self.grace_period) => {
                tracing::warn!("shutdown grace period expired, forcing termination");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS))
    }
}
