//! Catalog model.
//!
//! Two families of types live here:
//!
//! - **Descriptors** (`info`, `descriptor`): read-only views of upstream subscriptions,
//!   products and content, as supplied by an import process. They are never persisted.
//! - **Entities** (`product`, `content`): the organization-scoped records a refresh
//!   creates or updates, together with the rules for applying a descriptor onto them.

pub mod content;
pub mod descriptor;
pub mod info;
pub mod product;

pub use content::Content;
pub use descriptor::{
    BrandingData, ContentData, ProductContentData, ProductData, SubscriptionData,
};
pub use info::{
    BrandingInfo, BrandingRef, ContentInfo, ContentRef, ProductContentInfo, ProductContentRef,
    ProductInfo, ProductRef, SubscriptionInfo, SubscriptionRef,
};
pub use product::{Branding, EntityRef, Product, ProductContent, ReferenceResolver};
