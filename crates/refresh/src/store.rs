//! Persistence capability consumed by the refresh engine.
//!
//! The engine never talks to a database directly. It needs batched lookups by natural id,
//! create/update for products and content, and explicit unit-of-work control. Backends
//! live in `catalog-infra`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use catalog_core::{NaturalId, OrgId};
use catalog_model::{Content, Product};

/// Transient failure classes that make a whole refresh attempt worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Another writer created the same `(org, natural id)` concurrently.
    UniqueConstraintViolation,
    /// Lock wait timed out, deadlock detected, or serialization failure.
    LockTimeout,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::UniqueConstraintViolation => "unique_constraint_violation",
            ConflictKind::LockTimeout => "lock_timeout",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind}: {message}")]
    Conflict { kind: ConflictKind, message: String },

    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::Conflict {
            kind: ConflictKind::UniqueConstraintViolation,
            message: message.into(),
        }
    }

    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::Conflict {
            kind: ConflictKind::LockTimeout,
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// The conflict class, or `None` for non-retryable failures.
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            StoreError::Conflict { kind, .. } => Some(*kind),
            StoreError::Backend(_) => None,
        }
    }
}

/// Organization-scoped catalog persistence with unit-of-work control.
///
/// Transaction state is per calling thread: `in_transaction` reports whether the current
/// caller already owns an open unit of work. When it does, the refresh runs inside it and
/// leaves begin/commit/rollback to the caller.
///
/// Writes are only guaranteed to be visible to others after `commit`; a `rollback`
/// discards everything written since `begin`.
pub trait CatalogStore: Send + Sync {
    fn in_transaction(&self) -> bool;

    fn begin(&self) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    fn rollback(&self) -> Result<(), StoreError>;

    /// Batched lookup. Ids with no persisted entity are simply absent from the map.
    fn find_products_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Product>, StoreError>;

    fn find_content_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Content>, StoreError>;

    /// Insert a new product. Fails with a unique-constraint conflict if the org already
    /// holds a product with the same natural id.
    fn create_product(&self, product: Product) -> Result<Product, StoreError>;

    fn update_product(&self, product: Product) -> Result<Product, StoreError>;

    fn create_content(&self, content: Content) -> Result<Content, StoreError>;

    fn update_content(&self, content: Content) -> Result<Content, StoreError>;
}

impl<S: CatalogStore + ?Sized> CatalogStore for Arc<S> {
    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    fn begin(&self) -> Result<(), StoreError> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), StoreError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), StoreError> {
        (**self).rollback()
    }

    fn find_products_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Product>, StoreError> {
        (**self).find_products_by_ids(org_id, ids)
    }

    fn find_content_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Content>, StoreError> {
        (**self).find_content_by_ids(org_id, ids)
    }

    fn create_product(&self, product: Product) -> Result<Product, StoreError> {
        (**self).create_product(product)
    }

    fn update_product(&self, product: Product) -> Result<Product, StoreError> {
        (**self).update_product(product)
    }

    fn create_content(&self, content: Content) -> Result<Content, StoreError> {
        (**self).create_content(content)
    }

    fn update_content(&self, content: Content) -> Result<Content, StoreError> {
        (**self).update_content(content)
    }
}

impl<S: CatalogStore + ?Sized> CatalogStore for &S {
    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    fn begin(&self) -> Result<(), StoreError> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), StoreError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), StoreError> {
        (**self).rollback()
    }

    fn find_products_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Product>, StoreError> {
        (**self).find_products_by_ids(org_id, ids)
    }

    fn find_content_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Content>, StoreError> {
        (**self).find_content_by_ids(org_id, ids)
    }

    fn create_product(&self, product: Product) -> Result<Product, StoreError> {
        (**self).create_product(product)
    }

    fn update_product(&self, product: Product) -> Result<Product, StoreError> {
        (**self).update_product(product)
    }

    fn create_content(&self, content: Content) -> Result<Content, StoreError> {
        (**self).create_content(content)
    }

    fn update_content(&self, content: Content) -> Result<Content, StoreError> {
        (**self).update_content(content)
    }
}
