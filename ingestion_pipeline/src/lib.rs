// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Ingestion Pipeline
//!
//! The orchestrator process around the activity ingestion core: stage
//! implementations (Sync, Process, Enrich, Rank), the scheduler, the
//! SQLite-backed stores, the GitHub provider client, and the HTTP control
//! plane.
//!
//! ## Layers
//!
//! - `application` - stages and the services coordinating them
//! - `infrastructure` - configuration, persistence, provider transport,
//!   metrics
//! - `presentation` - the control-plane router and handlers
//!
//! The domain model and the ports these layers plug into live in the
//! `ingestion-pipeline-domain` crate; entry-point scaffolding (signals,
//! shutdown, exit codes) in `ingestion-pipeline-bootstrap`.

pub mod application;
pub mod infrastructure;
pub mod presentation;
