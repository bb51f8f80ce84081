// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Typed Entity Identifiers
//!
//! Marker-typed wrappers around `Uuid` so identifiers of different entity
//! families cannot be mixed up at compile time. A `ContributorId` is not
//! assignable where a `RepositoryId` is expected even though both are UUIDs
//! on the wire and in the store.
//!
//! ## Design
//!
//! - **Zero-cost**: `EntityId<T>` is a transparent wrapper; the marker type
//!   is phantom data.
//! - **Stable**: ids are generated once (UUID v4) at entity birth and never
//!   change; upserts resolve to the existing id for a known natural key.
//! - **Serde-transparent**: serializes as the plain UUID string.
//!
//! ## Usage
//!
//! ```rust
//! use ingestion_pipeline_domain::value_objects::entity_id::RepositoryId;
//!
//! let id = RepositoryId::new();
//! let parsed: RepositoryId = id.to_string().parse().unwrap();
//! assert_eq!(id, parsed);
//! ```

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::PipelineError;

/// Marker trait for entity id families.
///
/// Implemented by zero-sized marker types; `label()` names the family in
/// error messages.
pub trait IdKind {
    /// Human-readable family name used in parse errors
    fn label() -> &'static str;
}

/// Generic typed identifier backed by a UUID.
pub struct EntityId<T: IdKind> {
    value: Uuid,
    _marker: PhantomData<T>,
}

impl<T: IdKind> EntityId<T> {
    /// Generates a fresh random identifier
    pub fn new() -> Self {
        Self {
            value: Uuid::new_v4(),
            _marker: PhantomData,
        }
    }

    /// Wraps an existing UUID (e.g. read back from the store)
    pub fn from_uuid(value: Uuid) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.value
    }
}

impl<T: IdKind> Default for EntityId<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: IdKind> Clone for EntityId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdKind> Copy for EntityId<T> {}

impl<T: IdKind> PartialEq for EntityId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdKind> Eq for EntityId<T> {}

impl<T: IdKind> Hash for EntityId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdKind> fmt::Debug for EntityId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::label(), self.value)
    }
}

impl<T: IdKind> Display for EntityId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.value, f)
    }
}

impl<T: IdKind> FromStr for EntityId<T> {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Uuid::parse_str(s).map_err(|e| {
            PipelineError::validation_error(format!("invalid {} '{}': {}", T::label(), s, e))
        })?;
        Ok(Self::from_uuid(value))
    }
}

impl<T: IdKind> From<Uuid> for EntityId<T> {
    fn from(value: Uuid) -> Self {
        Self::from_uuid(value)
    }
}

impl<T: IdKind> From<EntityId<T>> for Uuid {
    fn from(id: EntityId<T>) -> Self {
        id.value
    }
}

// Serialize as the bare UUID string so the wire format and the store column
// stay plain TEXT.
impl<T: IdKind> Serialize for EntityId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value.to_string())
    }
}

impl<'de, T: IdKind> Deserialize<'de> for EntityId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = Uuid::parse_str(&s).map_err(serde::de::Error::custom)?;
        Ok(Self::from_uuid(value))
    }
}

macro_rules! id_kind {
    ($(#[$doc:meta])* $marker:ident, $alias:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $marker;

        impl IdKind for $marker {
            fn label() -> &'static str {
                $label
            }
        }

        $(#[$doc])*
        pub type $alias = EntityId<$marker>;
    };
}

id_kind!(
    /// Identifier for a [`Repository`](crate::entities::Repository)
    RepositoryIdKind,
    RepositoryId,
    "RepositoryId"
);
id_kind!(
    /// Identifier for a [`Contributor`](crate::entities::Contributor)
    ContributorIdKind,
    ContributorId,
    "ContributorId"
);
id_kind!(
    /// Identifier for a [`MergeRequest`](crate::entities::MergeRequest)
    MergeRequestIdKind,
    MergeRequestId,
    "MergeRequestId"
);
id_kind!(
    /// Identifier for a [`Commit`](crate::entities::Commit)
    CommitIdKind,
    CommitId,
    "CommitId"
);
id_kind!(
    /// Identifier for a [`ContributorRepository`](crate::entities::ContributorRepository) link
    ContributorRepositoryIdKind,
    ContributorRepositoryId,
    "ContributorRepositoryId"
);
id_kind!(
    /// Identifier for a [`ContributorRanking`](crate::entities::ContributorRanking) row
    RankingIdKind,
    RankingId,
    "RankingId"
);
