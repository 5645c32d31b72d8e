//! Persisted product entity.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalog_core::{
    CatalogEntity, DomainError, DomainResult, EntityKind, EntityUuid, NaturalId, OrgId,
};

use crate::info::ProductInfo;

/// Pointer from one entity to another: the natural id plus the surrogate id of the
/// instance it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: NaturalId,
    pub uuid: EntityUuid,
}

impl EntityRef {
    pub fn new(id: NaturalId, uuid: EntityUuid) -> Self {
        Self { id, uuid }
    }
}

/// A content definition attached to a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductContent {
    pub content: EntityRef,
    pub enabled: bool,
}

/// Marketing name attached to a product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub product_id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub brand_type: Option<String>,
}

impl Branding {
    pub fn new(
        product_id: impl Into<String>,
        name: impl Into<String>,
        brand_type: impl Into<String>,
    ) -> Self {
        Self {
            product_id: Some(product_id.into()),
            name: Some(name.into()),
            brand_type: Some(brand_type.into()),
        }
    }
}

/// Resolves natural ids to the entity a new reference should point at.
///
/// Implemented by whoever owns the canonical instance per natural id during a merge.
pub trait ReferenceResolver {
    fn product_ref(&self, id: &str) -> Option<EntityRef>;

    fn content_ref(&self, id: &str) -> Option<EntityRef>;
}

/// Organization-scoped product record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    uuid: EntityUuid,
    id: NaturalId,
    org_id: OrgId,
    name: Option<String>,
    multiplier: Option<i64>,
    attributes: BTreeMap<String, String>,
    dependent_product_ids: BTreeSet<String>,
    product_content: BTreeMap<NaturalId, ProductContent>,
    provided_products: BTreeSet<EntityRef>,
    derived_product: Option<EntityRef>,
    #[serde(default)]
    branding: BTreeSet<Branding>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// Create a bare product; both audit timestamps start at `now`.
    pub fn new(org_id: OrgId, uuid: EntityUuid, id: NaturalId, now: DateTime<Utc>) -> Self {
        Self {
            uuid,
            id,
            org_id,
            name: None,
            multiplier: None,
            attributes: BTreeMap::new(),
            dependent_product_ids: BTreeSet::new(),
            product_content: BTreeMap::new(),
            provided_products: BTreeSet::new(),
            derived_product: None,
            branding: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_content(mut self, content: EntityRef, enabled: bool) -> Self {
        self.product_content
            .insert(content.id.clone(), ProductContent { content, enabled });
        self
    }

    pub fn with_provided(mut self, product: EntityRef) -> Self {
        self.provided_products.insert(product);
        self
    }

    pub fn with_derived(mut self, product: EntityRef) -> Self {
        self.derived_product = Some(product);
        self
    }

    pub fn with_branding(mut self, branding: Branding) -> Self {
        self.branding.insert(branding);
        self
    }

    pub fn id(&self) -> &NaturalId {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn multiplier(&self) -> Option<i64> {
        self.multiplier
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn dependent_product_ids(&self) -> &BTreeSet<String> {
        &self.dependent_product_ids
    }

    pub fn product_content(&self) -> &BTreeMap<NaturalId, ProductContent> {
        &self.product_content
    }

    pub fn provided_products(&self) -> &BTreeSet<EntityRef> {
        &self.provided_products
    }

    pub fn derived_product(&self) -> Option<&EntityRef> {
        self.derived_product.as_ref()
    }

    pub fn branding(&self) -> &BTreeSet<Branding> {
        &self.branding
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.id.clone(), self.uuid)
    }

    /// Natural ids of the products this product points at (provided, then derived).
    pub fn referenced_product_ids(&self) -> impl Iterator<Item = &NaturalId> {
        self.provided_products
            .iter()
            .chain(self.derived_product.iter())
            .map(|r| &r.id)
    }

    pub fn referenced_content_ids(&self) -> impl Iterator<Item = &NaturalId> {
        self.product_content.keys()
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    /// Apply a descriptor onto this product.
    ///
    /// `None` fields leave the current value in place, with the exception of the derived
    /// product where `None` clears the reference. Every reference is re-pointed through
    /// `refs`; a reference that cannot be resolved is an invariant violation, since the
    /// caller is expected to have merged all children first.
    pub fn apply_changes(
        &mut self,
        update: &dyn ProductInfo,
        refs: &dyn ReferenceResolver,
    ) -> DomainResult<()> {
        if let Some(name) = update.name() {
            self.name = Some(name.to_string());
        }

        if let Some(multiplier) = update.multiplier() {
            self.multiplier = Some(multiplier);
        }

        if let Some(ids) = update.dependent_product_ids() {
            self.dependent_product_ids = ids.iter().cloned().collect();
        }

        if let Some(attributes) = update.attributes() {
            self.attributes = attributes
                .iter()
                .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
                .collect();
        }

        if let Some(edges) = update.product_content() {
            let mut product_content = BTreeMap::new();

            for edge in edges.into_iter().flatten() {
                let content = edge.content().ok_or_else(|| {
                    DomainError::validation(format!(
                        "product {} contains an incomplete product-content mapping",
                        self.id
                    ))
                })?;
                let content_id = NaturalId::parse(content.id(), "content")?;
                let resolved = refs.content_ref(content_id.as_str()).ok_or_else(|| {
                    DomainError::invariant(format!(
                        "product {} references unresolved content {content_id}",
                        self.id
                    ))
                })?;

                // Duplicate edges: the last one wins.
                product_content.insert(
                    content_id,
                    ProductContent {
                        content: resolved,
                        enabled: edge.enabled().unwrap_or(false),
                    },
                );
            }

            self.product_content = product_content;
        }

        self.derived_product = match update.derived_product() {
            Some(derived) => Some(self.resolve_product(derived.id(), refs)?),
            None => None,
        };

        if let Some(provided) = update.provided_products() {
            let mut resolved = BTreeSet::new();
            for product in provided.into_iter().flatten() {
                resolved.insert(self.resolve_product(product.id(), refs)?);
            }
            self.provided_products = resolved;
        }

        if let Some(branding) = update.branding() {
            self.branding = branding
                .into_iter()
                .flatten()
                .map(|b| Branding {
                    product_id: b.product_id().map(str::to_string),
                    name: b.name().map(str::to_string),
                    brand_type: b.brand_type().map(str::to_string),
                })
                .collect();
        }

        Ok(())
    }

    fn resolve_product(
        &self,
        raw_id: Option<&str>,
        refs: &dyn ReferenceResolver,
    ) -> DomainResult<EntityRef> {
        let id = NaturalId::parse(raw_id, "product")?;
        refs.product_ref(id.as_str()).ok_or_else(|| {
            DomainError::invariant(format!(
                "product {} references unresolved product {id}",
                self.id
            ))
        })
    }

    /// Whether both records hold the same data, ignoring audit timestamps.
    pub fn same_state_as(&self, other: &Product) -> bool {
        self.uuid == other.uuid
            && self.id == other.id
            && self.org_id == other.org_id
            && self.name == other.name
            && self.multiplier == other.multiplier
            && self.attributes == other.attributes
            && self.dependent_product_ids == other.dependent_product_ids
            && self.product_content == other.product_content
            && self.provided_products == other.provided_products
            && self.derived_product == other.derived_product
            && self.branding == other.branding
    }
}

impl CatalogEntity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn uuid(&self) -> EntityUuid {
        self.uuid
    }

    fn natural_id(&self) -> &NaturalId {
        &self.id
    }

    fn org_id(&self) -> OrgId {
        self.org_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BrandingData, ContentData, ProductContentData, ProductData};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct Refs(HashMap<String, EntityUuid>);

    impl ReferenceResolver for Refs {
        fn product_ref(&self, id: &str) -> Option<EntityRef> {
            self.0.get(id).map(|u| EntityRef::new(nid(id), *u))
        }

        fn content_ref(&self, id: &str) -> Option<EntityRef> {
            self.0.get(id).map(|u| EntityRef::new(nid(id), *u))
        }
    }

    fn nid(id: &str) -> NaturalId {
        id.parse().unwrap()
    }

    fn refs(ids: &[&str]) -> Refs {
        Refs(ids.iter().map(|id| (id.to_string(), EntityUuid::new())).collect())
    }

    fn product(id: &str) -> Product {
        Product::new(OrgId::new(), EntityUuid::new(), nid(id), Utc::now())
    }

    #[test]
    fn apply_changes_keeps_fields_the_update_leaves_out() {
        let mut p = product("pid-1").with_name("old").with_attribute("arch", "x86_64");
        let update = ProductData::new("pid-1");

        p.apply_changes(&update, &refs(&[])).unwrap();

        assert_eq!(p.name(), Some("old"));
        assert_eq!(p.attributes().get("arch").map(String::as_str), Some("x86_64"));
    }

    #[test]
    fn apply_changes_drops_null_attribute_values() {
        let mut p = product("pid-1");
        let mut update = ProductData::new("pid-1").with_attribute("arch", "ppc64");
        update
            .attributes
            .as_mut()
            .unwrap()
            .insert("sockets".to_string(), None);

        p.apply_changes(&update, &refs(&[])).unwrap();

        assert_eq!(p.attributes().len(), 1);
        assert_eq!(p.attributes().get("arch").map(String::as_str), Some("ppc64"));
    }

    #[test]
    fn apply_changes_repoints_references_through_resolver() {
        let resolver = refs(&["pid-2", "pid-3", "cid-1"]);
        let mut p = product("pid-1");
        let update = ProductData::new("pid-1")
            .with_provided(ProductData::new("pid-2"))
            .with_derived(ProductData::new("pid-3"))
            .with_content(ContentData::new("cid-1"), true);

        p.apply_changes(&update, &resolver).unwrap();

        let provided: Vec<_> = p.provided_products().iter().collect();
        assert_eq!(provided.len(), 1);
        assert_eq!(provided[0].uuid, resolver.0["pid-2"]);
        assert_eq!(p.derived_product().unwrap().uuid, resolver.0["pid-3"]);
        let pc = &p.product_content()["cid-1"];
        assert_eq!(pc.content.uuid, resolver.0["cid-1"]);
        assert!(pc.enabled);
    }

    #[test]
    fn apply_changes_clears_derived_product_when_absent() {
        let mut p = product("pid-1").with_derived(EntityRef::new(nid("pid-9"), EntityUuid::new()));

        p.apply_changes(&ProductData::new("pid-1"), &refs(&[])).unwrap();

        assert!(p.derived_product().is_none());
    }

    #[test]
    fn apply_changes_last_duplicate_content_edge_wins() {
        let mut p = product("pid-1");
        let update = ProductData::new("pid-1")
            .with_content(ContentData::new("cid-1"), true)
            .with_content(ContentData::new("cid-1"), false);

        p.apply_changes(&update, &refs(&["cid-1"])).unwrap();

        assert_eq!(p.product_content().len(), 1);
        assert!(!p.product_content()["cid-1"].enabled);
    }

    #[test]
    fn apply_changes_rejects_incomplete_content_mapping() {
        let mut p = product("pid-1");
        let mut update = ProductData::new("pid-1");
        update.product_content = Some(vec![Some(Arc::new(ProductContentData {
            content: None,
            enabled: Some(true),
        }))]);

        match p.apply_changes(&update, &refs(&[])) {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("incomplete")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn apply_changes_reports_unresolved_references() {
        let mut p = product("pid-1");
        let update = ProductData::new("pid-1").with_provided(ProductData::new("pid-404"));

        match p.apply_changes(&update, &refs(&[])) {
            Err(DomainError::InvariantViolation(msg)) => assert!(msg.contains("pid-404")),
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn same_state_ignores_timestamps() {
        let a = product("pid-1").with_name("n");
        let mut b = a.clone();
        b.touch(Utc::now() + chrono::Duration::seconds(30));

        assert!(a.same_state_as(&b));
        assert!(!a.same_state_as(&b.clone().with_name("other")));
    }

    #[test]
    fn apply_changes_keeps_branding_when_update_omits_it() {
        let mut p = product("eng-1").with_branding(Branding::new("eng-1", "Brand", "OS"));
        let update = ProductData::new("eng-1").with_name("renamed");

        p.apply_changes(&update, &refs(&[])).unwrap();

        assert_eq!(p.branding().len(), 1);
        assert!(p.branding().contains(&Branding::new("eng-1", "Brand", "OS")));
    }

    #[test]
    fn apply_changes_replaces_branding_and_drops_null_entries() {
        let mut p = product("eng-1").with_branding(Branding::new("eng-1", "Old", "OS"));
        let mut update =
            ProductData::new("eng-1").with_branding(BrandingData::new("eng-1", "New", "OS"));
        update.branding.get_or_insert_with(Vec::new).push(None);

        p.apply_changes(&update, &refs(&[])).unwrap();

        let names: Vec<_> = p.branding().iter().filter_map(|b| b.name.as_deref()).collect();
        assert_eq!(names, vec!["New"]);
    }

    #[test]
    fn explicitly_empty_branding_clears_it() {
        let mut p = product("eng-1").with_branding(Branding::new("eng-1", "Brand", "OS"));
        let mut update = ProductData::new("eng-1");
        update.branding = Some(vec![None]);

        p.apply_changes(&update, &refs(&[])).unwrap();

        assert!(p.branding().is_empty());
    }

    #[test]
    fn same_state_detects_branding_changes() {
        let a = product("eng-1").with_branding(Branding::new("eng-1", "Brand", "OS"));

        assert!(a.same_state_as(&a.clone()));
        let rebranded = a.clone().with_branding(Branding::new("eng-1", "Other", "OS"));
        assert!(!a.same_state_as(&rebranded));
    }
}
