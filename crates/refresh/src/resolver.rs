//! Identity resolution: which natural ids already exist for the organization.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use catalog_core::{CatalogEntity, NaturalId, OrgId};
use catalog_model::{Content, Product};

use crate::store::{CatalogStore, StoreError};
use crate::walker::WorkingSet;

/// Persisted entities matching a working set, plus anything they reference.
#[derive(Debug, Clone, Default)]
pub struct ExistingEntities {
    pub products: BTreeMap<NaturalId, Product>,
    pub content: BTreeMap<NaturalId, Content>,
}

impl ExistingEntities {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.content.is_empty()
    }
}

/// Looks up existing entities by natural id with one batched query per kind.
///
/// Existing products can reference products or content outside the working set (for
/// example a provided product that upstream no longer lists). Those are fetched in
/// follow-up rounds so that the merge always sees the full neighbourhood it may touch.
pub struct IdentityResolver<'s, S: ?Sized> {
    store: &'s S,
    org_id: OrgId,
}

impl<'s, S: CatalogStore + ?Sized> IdentityResolver<'s, S> {
    pub fn new(store: &'s S, org_id: OrgId) -> Self {
        Self { store, org_id }
    }

    pub fn resolve(&self, working_set: &WorkingSet) -> Result<ExistingEntities, StoreError> {
        let mut existing = ExistingEntities::default();
        let mut requested_products = working_set.product_ids();
        let mut requested_content = working_set.content_ids();
        let mut pending_products = requested_products.clone();
        let mut pending_content = requested_content.clone();
        let mut round = 0u32;

        loop {
            round += 1;

            if round == 1 || !pending_products.is_empty() {
                let found = self
                    .store
                    .find_products_by_ids(self.org_id, &pending_products)?;
                self.check_batch(&found, &pending_products)?;
                existing.products.extend(found);
            }

            if round == 1 || !pending_content.is_empty() {
                let found = self
                    .store
                    .find_content_by_ids(self.org_id, &pending_content)?;
                self.check_batch(&found, &pending_content)?;
                existing.content.extend(found);
            }

            let (next_products, next_content) = self.unrequested_references(
                &existing,
                &pending_products,
                &requested_products,
                &requested_content,
            );

            if next_products.is_empty() && next_content.is_empty() {
                break;
            }

            debug!(
                org_id = %self.org_id,
                round,
                products = next_products.len(),
                content = next_content.len(),
                "fetching entities referenced outside the working set"
            );

            requested_products.extend(next_products.iter().cloned());
            requested_content.extend(next_content.iter().cloned());
            pending_products = next_products;
            pending_content = next_content;
        }

        for product in existing.products.values() {
            for id in product.referenced_product_ids() {
                if !existing.products.contains_key(id)
                    && !working_set.products().contains_key(id)
                {
                    warn!(
                        org_id = %self.org_id,
                        product = %product.id(),
                        missing = %id,
                        "existing product references unknown product"
                    );
                }
            }
        }

        Ok(existing)
    }

    /// References held by freshly fetched products that have not been requested yet.
    fn unrequested_references(
        &self,
        existing: &ExistingEntities,
        just_fetched: &BTreeSet<NaturalId>,
        requested_products: &BTreeSet<NaturalId>,
        requested_content: &BTreeSet<NaturalId>,
    ) -> (BTreeSet<NaturalId>, BTreeSet<NaturalId>) {
        let mut products = BTreeSet::new();
        let mut content = BTreeSet::new();

        for product in just_fetched.iter().filter_map(|id| existing.products.get(id)) {
            for id in product.referenced_product_ids() {
                if !requested_products.contains(id) {
                    products.insert(id.clone());
                }
            }
            for id in product.referenced_content_ids() {
                if !requested_content.contains(id) {
                    content.insert(id.clone());
                }
            }
        }

        (products, content)
    }

    /// Tenant isolation check on whatever the store handed back.
    fn check_batch<E: CatalogEntity>(
        &self,
        found: &BTreeMap<NaturalId, E>,
        requested: &BTreeSet<NaturalId>,
    ) -> Result<(), StoreError> {
        for (id, entity) in found {
            if entity.org_id() != self.org_id {
                return Err(StoreError::backend(format!(
                    "store returned {} {id} belonging to org {} for org {}",
                    E::KIND,
                    entity.org_id(),
                    self.org_id
                )));
            }
            if entity.natural_id() != id || !requested.contains(id) {
                return Err(StoreError::backend(format!(
                    "store returned unrequested {} {id}",
                    E::KIND
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedStore, StoreOp, nid};
    use crate::walker::GraphWalker;
    use catalog_core::EntityUuid;
    use catalog_model::{EntityRef, ProductData};
    use chrono::Utc;

    fn working_set(products: &[&str]) -> WorkingSet {
        let products = products
            .iter()
            .map(|id| (nid(id), ProductData::new(*id).shared()))
            .collect();
        GraphWalker::walk(&BTreeMap::new(), &products, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn one_query_per_kind_when_nothing_exists() {
        let store = ScriptedStore::new();
        let org_id = OrgId::new();

        let existing = IdentityResolver::new(&store, org_id)
            .resolve(&working_set(&["pid-1", "pid-2", "pid-3"]))
            .unwrap();

        assert!(existing.is_empty());
        assert_eq!(store.calls(StoreOp::FindProducts), 1);
        assert_eq!(store.calls(StoreOp::FindContent), 1);
    }

    #[test]
    fn follows_references_of_existing_products() {
        let store = ScriptedStore::new();
        let org_id = OrgId::new();
        let orphan = Product::new(org_id, EntityUuid::new(), nid("pid-old"), Utc::now());
        let parent = Product::new(org_id, EntityUuid::new(), nid("pid-1"), Utc::now())
            .with_provided(orphan.entity_ref());
        store.seed_product(parent);
        store.seed_product(orphan);

        let existing = IdentityResolver::new(&store, org_id)
            .resolve(&working_set(&["pid-1"]))
            .unwrap();

        assert!(existing.products.contains_key("pid-old"));
        assert_eq!(store.calls(StoreOp::FindProducts), 2);
    }

    #[test]
    fn rejects_entities_from_other_orgs() {
        let store = ScriptedStore::new().ignoring_org();
        let foreign = Product::new(OrgId::new(), EntityUuid::new(), nid("pid-1"), Utc::now());
        store.seed_product(foreign);

        let err = IdentityResolver::new(&store, OrgId::new())
            .resolve(&working_set(&["pid-1"]))
            .unwrap_err();

        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("belonging to org")));
    }

    #[test]
    fn tolerates_dangling_references() {
        let store = ScriptedStore::new();
        let org_id = OrgId::new();
        let parent = Product::new(org_id, EntityUuid::new(), nid("pid-1"), Utc::now())
            .with_provided(EntityRef::new(nid("pid-gone"), EntityUuid::new()));
        store.seed_product(parent);

        let existing = IdentityResolver::new(&store, org_id)
            .resolve(&working_set(&["pid-1"]))
            .unwrap();

        assert_eq!(existing.products.len(), 1);
        assert_eq!(store.calls(StoreOp::FindProducts), 2);
    }
}
