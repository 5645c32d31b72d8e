//! Plain descriptor records implementing the `info` traits.
//!
//! These are what an import process deserializes upstream payloads into. Every field is
//! optional so that malformed input survives deserialization and is rejected (or
//! tolerated) by the refresh engine itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::info::{
    BrandingInfo, BrandingRef, ContentInfo, ContentRef, ProductContentInfo, ProductContentRef,
    ProductInfo, ProductRef, SubscriptionInfo, SubscriptionRef,
};

/// Upstream subscription record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionData {
    pub id: Option<String>,
    pub order_number: Option<String>,
    pub product: Option<Arc<ProductData>>,
}

impl SubscriptionData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_order_number(mut self, order_number: impl Into<String>) -> Self {
        self.order_number = Some(order_number.into());
        self
    }

    pub fn with_product(mut self, product: ProductData) -> Self {
        self.product = Some(Arc::new(product));
        self
    }

    pub fn shared(self) -> SubscriptionRef {
        Arc::new(self)
    }
}

impl SubscriptionInfo for SubscriptionData {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn order_number(&self) -> Option<&str> {
        self.order_number.as_deref()
    }

    fn product(&self) -> Option<ProductRef> {
        self.product.clone().map(|p| p as ProductRef)
    }
}

/// Upstream product record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductData {
    pub id: Option<String>,
    pub name: Option<String>,
    pub multiplier: Option<i64>,
    pub attributes: Option<BTreeMap<String, Option<String>>>,
    pub dependent_product_ids: Option<Vec<String>>,
    pub provided_products: Option<Vec<Option<Arc<ProductData>>>>,
    pub derived_product: Option<Arc<ProductData>>,
    pub product_content: Option<Vec<Option<Arc<ProductContentData>>>>,
    pub branding: Option<Vec<Option<Arc<BrandingData>>>>,
}

impl ProductData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), Some(value.into()));
        self
    }

    pub fn with_dependent_product_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependent_product_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Append a provided product.
    pub fn with_provided(mut self, product: ProductData) -> Self {
        self.provided_products
            .get_or_insert_with(Vec::new)
            .push(Some(Arc::new(product)));
        self
    }

    pub fn with_derived(mut self, product: ProductData) -> Self {
        self.derived_product = Some(Arc::new(product));
        self
    }

    /// Append a content edge.
    pub fn with_content(mut self, content: ContentData, enabled: bool) -> Self {
        self.product_content
            .get_or_insert_with(Vec::new)
            .push(Some(Arc::new(ProductContentData::new(content, enabled))));
        self
    }

    /// Append a branding entry.
    pub fn with_branding(mut self, branding: BrandingData) -> Self {
        self.branding
            .get_or_insert_with(Vec::new)
            .push(Some(Arc::new(branding)));
        self
    }

    pub fn shared(self) -> ProductRef {
        Arc::new(self)
    }
}

impl ProductInfo for ProductData {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn multiplier(&self) -> Option<i64> {
        self.multiplier
    }

    fn attributes(&self) -> Option<&BTreeMap<String, Option<String>>> {
        self.attributes.as_ref()
    }

    fn dependent_product_ids(&self) -> Option<&[String]> {
        self.dependent_product_ids.as_deref()
    }

    fn provided_products(&self) -> Option<Vec<Option<ProductRef>>> {
        self.provided_products.as_ref().map(|products| {
            products
                .iter()
                .map(|p| p.clone().map(|p| p as ProductRef))
                .collect()
        })
    }

    fn derived_product(&self) -> Option<ProductRef> {
        self.derived_product.clone().map(|p| p as ProductRef)
    }

    fn product_content(&self) -> Option<Vec<Option<ProductContentRef>>> {
        self.product_content.as_ref().map(|edges| {
            edges
                .iter()
                .map(|pc| pc.clone().map(|pc| pc as ProductContentRef))
                .collect()
        })
    }

    fn branding(&self) -> Option<Vec<Option<BrandingRef>>> {
        self.branding.as_ref().map(|brands| {
            brands
                .iter()
                .map(|b| b.clone().map(|b| b as BrandingRef))
                .collect()
        })
    }
}

/// Upstream branding record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrandingData {
    pub product_id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub brand_type: Option<String>,
}

impl BrandingData {
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

impl BrandingInfo for BrandingData {
    fn product_id(&self) -> Option<&str> {
        self.product_id.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn brand_type(&self) -> Option<&str> {
        self.brand_type.as_deref()
    }
}

/// Upstream content record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentData {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub label: Option<String>,
    pub vendor: Option<String>,
    pub content_url: Option<String>,
    pub gpg_url: Option<String>,
    pub required_tags: Option<String>,
    pub release_version: Option<String>,
    pub arches: Option<String>,
    pub metadata_expiration: Option<i64>,
    pub required_product_ids: Option<Vec<String>>,
}

impl ContentData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_content_url(mut self, url: impl Into<String>) -> Self {
        self.content_url = Some(url.into());
        self
    }

    pub fn shared(self) -> ContentRef {
        Arc::new(self)
    }
}

impl ContentInfo for ContentData {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    fn content_url(&self) -> Option<&str> {
        self.content_url.as_deref()
    }

    fn gpg_url(&self) -> Option<&str> {
        self.gpg_url.as_deref()
    }

    fn required_tags(&self) -> Option<&str> {
        self.required_tags.as_deref()
    }

    fn release_version(&self) -> Option<&str> {
        self.release_version.as_deref()
    }

    fn arches(&self) -> Option<&str> {
        self.arches.as_deref()
    }

    fn metadata_expiration(&self) -> Option<i64> {
        self.metadata_expiration
    }

    fn required_product_ids(&self) -> Option<&[String]> {
        self.required_product_ids.as_deref()
    }
}

/// Upstream product/content edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductContentData {
    pub content: Option<Arc<ContentData>>,
    pub enabled: Option<bool>,
}

impl ProductContentData {
    pub fn new(content: ContentData, enabled: bool) -> Self {
        Self {
            content: Some(Arc::new(content)),
            enabled: Some(enabled),
        }
    }
}

impl ProductContentInfo for ProductContentData {
    fn content(&self) -> Option<ContentRef> {
        self.content.clone().map(|c| c as ContentRef)
    }

    fn enabled(&self) -> Option<bool> {
        self.enabled
    }
}
