//! Strongly-typed identifiers used across the catalog.

use core::borrow::Borrow;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of an owning organization (multi-tenant boundary).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(Uuid);

/// Surrogate identifier of a persisted catalog entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityUuid(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(OrgId, "OrgId");
impl_uuid_newtype!(EntityUuid, "EntityUuid");

/// Business-meaningful identifier of a subscription, product or content.
///
/// Natural ids are stable across systems and are what descriptors and persisted
/// entities are matched on. A natural id is never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NaturalId(String);

impl NaturalId {
    /// Validate an optional raw id coming from caller-supplied data.
    ///
    /// `label` names the kind of thing being identified and only feeds the error message.
    pub fn parse(raw: Option<&str>, label: &str) -> DomainResult<Self> {
        match raw {
            None => Err(DomainError::invalid_id(format!("{label} has a null id"))),
            Some("") => Err(DomainError::invalid_id(format!("{label} has an empty id"))),
            Some(id) => Ok(Self(id.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for NaturalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NaturalId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NaturalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NaturalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(Some(s), "NaturalId")
    }
}

impl TryFrom<String> for NaturalId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(DomainError::invalid_id("NaturalId has an empty id"));
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for NaturalId {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

impl From<NaturalId> for String {
    fn from(value: NaturalId) -> Self {
        value.0
    }
}
