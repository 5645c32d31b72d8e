//! Read-only descriptor capabilities.
//!
//! Upstream data reaches the refresh engine through these getter-only traits, which keeps
//! the engine independent of whatever concrete types the import process produces.
//! Caller data is not trusted: any id may be missing (`None`), any collection may contain
//! `None` entries, and nothing guarantees that the product graph is acyclic.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type SubscriptionRef = Arc<dyn SubscriptionInfo>;
pub type ProductRef = Arc<dyn ProductInfo>;
pub type ContentRef = Arc<dyn ContentInfo>;
pub type ProductContentRef = Arc<dyn ProductContentInfo>;
pub type BrandingRef = Arc<dyn BrandingInfo>;

/// An upstream subscription.
pub trait SubscriptionInfo: fmt::Debug + Send + Sync {
    fn id(&self) -> Option<&str>;

    fn order_number(&self) -> Option<&str> {
        None
    }

    /// The product granted by this subscription.
    fn product(&self) -> Option<ProductRef>;
}

/// An upstream product.
///
/// For collections, `None` means "not provided" (leave existing data alone), while
/// `Some(vec![])` means "explicitly empty".
pub trait ProductInfo: fmt::Debug + Send + Sync {
    fn id(&self) -> Option<&str>;

    fn name(&self) -> Option<&str>;

    fn multiplier(&self) -> Option<i64> {
        None
    }

    /// Attributes; entries with a `None` value are dropped when applied.
    fn attributes(&self) -> Option<&BTreeMap<String, Option<String>>> {
        None
    }

    fn dependent_product_ids(&self) -> Option<&[String]> {
        None
    }

    fn provided_products(&self) -> Option<Vec<Option<ProductRef>>>;

    /// Unlike the collections above, `None` here means "no derived product".
    fn derived_product(&self) -> Option<ProductRef>;

    fn product_content(&self) -> Option<Vec<Option<ProductContentRef>>>;

    /// Branding shown for this product; `None` entries are dropped when applied.
    fn branding(&self) -> Option<Vec<Option<BrandingRef>>> {
        None
    }
}

/// An upstream content definition.
pub trait ContentInfo: fmt::Debug + Send + Sync {
    fn id(&self) -> Option<&str>;

    fn name(&self) -> Option<&str>;

    fn content_type(&self) -> Option<&str> {
        None
    }

    fn label(&self) -> Option<&str> {
        None
    }

    fn vendor(&self) -> Option<&str> {
        None
    }

    fn content_url(&self) -> Option<&str> {
        None
    }

    fn gpg_url(&self) -> Option<&str> {
        None
    }

    fn required_tags(&self) -> Option<&str> {
        None
    }

    fn release_version(&self) -> Option<&str> {
        None
    }

    fn arches(&self) -> Option<&str> {
        None
    }

    fn metadata_expiration(&self) -> Option<i64> {
        None
    }

    fn required_product_ids(&self) -> Option<&[String]> {
        None
    }
}

/// Edge between a product and one of its content definitions.
pub trait ProductContentInfo: fmt::Debug + Send + Sync {
    fn content(&self) -> Option<ContentRef>;

    /// A missing flag is treated as disabled.
    fn enabled(&self) -> Option<bool>;
}

/// Marketing name applied to an engineering product.
pub trait BrandingInfo: fmt::Debug + Send + Sync {
    /// The engineering product being branded.
    fn product_id(&self) -> Option<&str>;

    fn name(&self) -> Option<&str>;

    fn brand_type(&self) -> Option<&str>;
}
