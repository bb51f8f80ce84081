// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain service ports. The provider client is an infrastructure port: the
//! trait lives here, the transport implementation lives in the main crate.

pub mod provider_client;

pub use provider_client::{
    ProviderClient, ProviderCommit, ProviderEventRepository, ProviderPullRequest,
    ProviderPullRequestEvent, ProviderRepository, ProviderUser, ProviderUserSummary,
    RateLimitSnapshot,
};
