// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Contributor-repository junction: per-pair activity roll-up, unique on
//! `(contributor_uuid, repository_uuid)`. Counters are folded in by the
//! Process stage; first/last contribution dates move via min/max only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::entity_id::{ContributorId, ContributorRepositoryId, RepositoryId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorRepository {
    pub uuid: ContributorRepositoryId,
    pub contributor_uuid: ContributorId,
    pub contributor_provider_id: i64,
    pub repository_uuid: RepositoryId,
    pub repository_provider_id: i64,

    pub commit_count: i64,
    pub pull_requests: i64,
    pub reviews: i64,
    pub issues_opened: i64,
    pub lines_added: i64,
    pub lines_removed: i64,

    pub first_contribution_date: Option<DateTime<Utc>>,
    pub last_contribution_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContributorRepository {
    /// Creates an empty roll-up for a newly observed pair.
    pub fn new_link(
        contributor_uuid: ContributorId,
        contributor_provider_id: i64,
        repository_uuid: RepositoryId,
        repository_provider_id: i64,
    ) -> Self {
        let now = Utc::now();
        ContributorRepository {
            uuid: ContributorRepositoryId::new(),
            contributor_uuid,
            contributor_provider_id,
            repository_uuid,
            repository_provider_id,
            commit_count: 0,
            pull_requests: 0,
            reviews: 0,
            issues_opened: 0,
            lines_added: 0,
            lines_removed: 0,
            first_contribution_date: None,
            last_contribution_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Widens the contribution window to include `at` (min/max semantics).
    pub fn observe_contribution_at(&mut self, at: DateTime<Utc>) {
        self.first_contribution_date = Some(match self.first_contribution_date {
            Some(first) => first.min(at),
            None => at,
        });
        self.last_contribution_date = Some(match self.last_contribution_date {
            Some(last) => last.max(at),
            None => at,
        });
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_contribution_window_widens_only() {
        let mut link = ContributorRepository::new_link(
            ContributorId::new(),
            7,
            RepositoryId::new(),
            1001,
        );
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let middle = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        link.observe_contribution_at(middle);
        assert_eq!(link.first_contribution_date, Some(middle));
        assert_eq!(link.last_contribution_date, Some(middle));

        link.observe_contribution_at(late);
        link.observe_contribution_at(early);
        assert_eq!(link.first_contribution_date, Some(early));
        assert_eq!(link.last_contribution_date, Some(late));

        // A middle observation no longer moves either bound
        link.observe_contribution_at(middle);
        assert_eq!(link.first_contribution_date, Some(early));
        assert_eq!(link.last_contribution_date, Some(late));
    }
}
