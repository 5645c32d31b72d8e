use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use catalog_core::{CatalogEntity, EntityKind, EntityUuid, NaturalId};
use catalog_model::{Content, Product};

/// What a refresh did to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    Created,
    Updated,
    Unchanged,
}

/// Outcome of a successful refresh: every entity in (or referenced by) the working set,
/// keyed by natural id, with the state it ended up in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshResult {
    products: BTreeMap<NaturalId, Product>,
    content: BTreeMap<NaturalId, Content>,
    /// Reserved. A refresh currently never produces pools.
    pools: BTreeMap<NaturalId, EntityUuid>,
    states: BTreeMap<EntityKind, BTreeMap<NaturalId, EntityState>>,
}

impl RefreshResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_product(&mut self, product: Product, state: EntityState) {
        self.record_state(Product::KIND, product.natural_id().clone(), state);
        self.products.insert(product.natural_id().clone(), product);
    }

    pub(crate) fn record_content(&mut self, content: Content, state: EntityState) {
        self.record_state(Content::KIND, content.natural_id().clone(), state);
        self.content.insert(content.natural_id().clone(), content);
    }

    fn record_state(&mut self, kind: EntityKind, id: NaturalId, state: EntityState) {
        self.states.entry(kind).or_default().insert(id, state);
    }

    pub fn products(&self) -> &BTreeMap<NaturalId, Product> {
        &self.products
    }

    pub fn content(&self) -> &BTreeMap<NaturalId, Content> {
        &self.content
    }

    pub fn pools(&self) -> &BTreeMap<NaturalId, EntityUuid> {
        &self.pools
    }

    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn content_by_id(&self, id: &str) -> Option<&Content> {
        self.content.get(id)
    }

    pub fn entity_state(&self, kind: EntityKind, id: &str) -> Option<EntityState> {
        self.states.get(&kind)?.get(id).copied()
    }

    /// Products whose state is one of `states`.
    pub fn products_in<'a>(
        &'a self,
        states: &'a [EntityState],
    ) -> impl Iterator<Item = &'a Product> + 'a {
        self.products.values().filter(move |p| {
            self.entity_state(EntityKind::Product, p.natural_id().as_str())
                .is_some_and(|s| states.contains(&s))
        })
    }

    pub fn content_in<'a>(
        &'a self,
        states: &'a [EntityState],
    ) -> impl Iterator<Item = &'a Content> + 'a {
        self.content.values().filter(move |c| {
            self.entity_state(EntityKind::Content, c.natural_id().as_str())
                .is_some_and(|s| states.contains(&s))
        })
    }

    /// Number of entities per state across all kinds.
    pub fn state_counts(&self) -> BTreeMap<EntityState, usize> {
        let mut counts = BTreeMap::new();
        for state in self.states.values().flat_map(BTreeMap::values) {
            *counts.entry(*state).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.content.is_empty() && self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::OrgId;
    use chrono::Utc;

    fn product(id: &str) -> Product {
        Product::new(OrgId::new(), EntityUuid::new(), id.parse().unwrap(), Utc::now())
    }

    fn content(id: &str) -> Content {
        Content::new(OrgId::new(), EntityUuid::new(), id.parse().unwrap(), Utc::now())
    }

    #[test]
    fn filters_by_state() {
        let mut result = RefreshResult::new();
        result.record_product(product("pid-1"), EntityState::Created);
        result.record_product(product("pid-2"), EntityState::Unchanged);
        result.record_product(product("pid-3"), EntityState::Updated);

        let changed: Vec<_> = result
            .products_in(&[EntityState::Created, EntityState::Updated])
            .map(|p| p.id().as_str())
            .collect();

        assert_eq!(changed, vec!["pid-1", "pid-3"]);
        assert_eq!(
            result.entity_state(EntityKind::Product, "pid-2"),
            Some(EntityState::Unchanged)
        );
        assert_eq!(result.entity_state(EntityKind::Content, "pid-2"), None);
    }

    #[test]
    fn counts_states_across_kinds() {
        let mut result = RefreshResult::new();
        result.record_product(product("pid-1"), EntityState::Created);
        result.record_product(product("pid-2"), EntityState::Unchanged);
        result.record_content(content("cid-1"), EntityState::Created);

        let counts = result.state_counts();

        assert_eq!(counts.get(&EntityState::Created), Some(&2));
        assert_eq!(counts.get(&EntityState::Unchanged), Some(&1));
        assert_eq!(counts.get(&EntityState::Updated), None);
    }

    #[test]
    fn serializes_states_by_kind() {
        let mut result = RefreshResult::new();
        result.record_product(product("pid-1"), EntityState::Created);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["states"]["product"]["pid-1"], "created");
        assert!(json["pools"].as_object().unwrap().is_empty());
    }
}
