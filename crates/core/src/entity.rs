//! Entity trait: identity + continuity across refreshes.

use serde::{Deserialize, Serialize};

use crate::id::{EntityUuid, NaturalId, OrgId};

/// The kinds of entity a refresh deals with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Product,
    Content,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Content => "content",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, organization-scoped catalog entity.
///
/// Entities carry two identities: a surrogate `uuid` owned by the store and a
/// `natural_id` shared with upstream systems. Refreshes match on the natural id.
pub trait CatalogEntity {
    const KIND: EntityKind;

    fn uuid(&self) -> EntityUuid;

    fn natural_id(&self) -> &NaturalId;

    fn org_id(&self) -> OrgId;
}
