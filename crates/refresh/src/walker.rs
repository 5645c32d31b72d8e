//! Transitive closure over the descriptor graph.
//!
//! Starting from the directly-added products, content and subscriptions, the walker
//! follows provided products, derived products and product-content edges until every
//! reachable descriptor has been collected. Each natural id appears once per kind. The
//! graph may contain cycles and may be arbitrarily deep, so traversal uses an explicit
//! stack with a visited set instead of recursion.
//!
//! When a natural id is reachable both as a directly-added descriptor and as a nested
//! stub, the directly-added one is kept and its children are the ones walked. Between
//! two nested stubs, the first one discovered wins.
//!
//! [`GraphWalker::check`] validates only newly added input, so accumulating input costs
//! time proportional to what is added. The closure itself is built once, on demand.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use catalog_core::NaturalId;
use catalog_model::{ContentRef, ProductRef, SubscriptionRef};

use crate::error::RefreshError;

/// The closure of everything a refresh must reconcile, keyed by natural id.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    products: BTreeMap<NaturalId, ProductRef>,
    content: BTreeMap<NaturalId, ContentRef>,
}

impl WorkingSet {
    pub fn products(&self) -> &BTreeMap<NaturalId, ProductRef> {
        &self.products
    }

    pub fn content(&self) -> &BTreeMap<NaturalId, ContentRef> {
        &self.content
    }

    pub fn product_ids(&self) -> BTreeSet<NaturalId> {
        self.products.keys().cloned().collect()
    }

    pub fn content_ids(&self) -> BTreeSet<NaturalId> {
        self.content.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.content.is_empty()
    }
}

pub struct GraphWalker<'a> {
    direct_products: &'a BTreeMap<NaturalId, ProductRef>,
    direct_content: &'a BTreeMap<NaturalId, ContentRef>,
    strict: bool,
    set: WorkingSet,
    pending: Vec<ProductRef>,
}

impl<'a> GraphWalker<'a> {
    /// Compute the working set. Fails on the first missing or empty id found anywhere in
    /// the graph, or on a product-content edge without content.
    pub fn walk(
        subscriptions: &BTreeMap<NaturalId, SubscriptionRef>,
        products: &'a BTreeMap<NaturalId, ProductRef>,
        content: &'a BTreeMap<NaturalId, ContentRef>,
    ) -> Result<WorkingSet, RefreshError> {
        let mut walker = Self::new(products, content, true);
        walker.traverse(subscriptions)?;
        Ok(walker.set)
    }

    /// Compute the working set of input that already passed [`GraphWalker::check`].
    ///
    /// A malformed descriptor can still turn up here when two different nested stubs
    /// share an id and the check saw the other one. It is logged and left out.
    pub fn closure(
        subscriptions: &BTreeMap<NaturalId, SubscriptionRef>,
        products: &'a BTreeMap<NaturalId, ProductRef>,
        content: &'a BTreeMap<NaturalId, ContentRef>,
    ) -> WorkingSet {
        let mut walker = Self::new(products, content, false);
        if let Err(err) = walker.traverse(subscriptions) {
            warn!(error = %err, "closure walk stopped early");
        }
        walker.set
    }

    /// Validate newly added descriptors and everything they reach without building a
    /// working set.
    ///
    /// Stubs whose id is in `known_products` are not expanded: the directly added
    /// descriptor takes their place in the closure and was checked when it was added.
    pub fn check<'d>(
        subscriptions: impl IntoIterator<Item = &'d SubscriptionRef>,
        products: impl IntoIterator<Item = &'d ProductRef>,
        known_products: &BTreeMap<NaturalId, ProductRef>,
    ) -> Result<(), RefreshError> {
        let mut seen = BTreeSet::new();
        let mut pending = Vec::new();

        for product in products {
            if seen.insert(NaturalId::parse(product.id(), "product")?) {
                pending.push(product.clone());
            }
        }

        let mut reached = |product: ProductRef, pending: &mut Vec<ProductRef>| {
            let id = NaturalId::parse(product.id(), "product")?;
            if !known_products.contains_key(&id) && seen.insert(id) {
                pending.push(product);
            }
            Ok::<_, RefreshError>(())
        };

        for subscription in subscriptions {
            if let Some(product) = subscription.product() {
                reached(product, &mut pending)?;
            }
        }

        while let Some(product) = pending.pop() {
            let (nested, content) = children(&product)?;
            for descriptor in content {
                NaturalId::parse(descriptor.id(), "content")?;
            }
            for child in nested {
                reached(child, &mut pending)?;
            }
        }

        Ok(())
    }

    fn new(
        direct_products: &'a BTreeMap<NaturalId, ProductRef>,
        direct_content: &'a BTreeMap<NaturalId, ContentRef>,
        strict: bool,
    ) -> Self {
        Self {
            direct_products,
            direct_content,
            strict,
            set: WorkingSet::default(),
            pending: Vec::new(),
        }
    }

    fn traverse(
        &mut self,
        subscriptions: &BTreeMap<NaturalId, SubscriptionRef>,
    ) -> Result<(), RefreshError> {
        let (direct_products, direct_content) = (self.direct_products, self.direct_content);

        for (id, descriptor) in direct_content {
            self.set.content.insert(id.clone(), descriptor.clone());
        }

        for descriptor in direct_products.values() {
            self.visit_product(descriptor.clone())?;
        }

        for subscription in subscriptions.values() {
            if let Some(product) = subscription.product() {
                self.visit_product(product)?;
            }
        }

        while let Some(product) = self.pending.pop() {
            self.expand(&product)?;
        }

        Ok(())
    }

    /// Fail in strict mode, otherwise log and skip the offending descriptor.
    fn reject(&self, err: RefreshError) -> Result<(), RefreshError> {
        if self.strict {
            return Err(err);
        }
        warn!(error = %err, "skipping malformed descriptor");
        Ok(())
    }

    fn visit_product(&mut self, candidate: ProductRef) -> Result<(), RefreshError> {
        let id = match NaturalId::parse(candidate.id(), "product") {
            Ok(id) => id,
            Err(err) => return self.reject(err.into()),
        };
        if self.set.products.contains_key(&id) {
            return Ok(());
        }

        let effective = self.direct_products.get(&id).cloned().unwrap_or(candidate);
        self.set.products.insert(id, effective.clone());
        self.pending.push(effective);
        Ok(())
    }

    fn visit_content(&mut self, candidate: ContentRef) -> Result<(), RefreshError> {
        let id = match NaturalId::parse(candidate.id(), "content") {
            Ok(id) => id,
            Err(err) => return self.reject(err.into()),
        };
        if self.set.content.contains_key(&id) {
            return Ok(());
        }

        let effective = self.direct_content.get(&id).cloned().unwrap_or(candidate);
        self.set.content.insert(id, effective);
        Ok(())
    }

    fn expand(&mut self, product: &ProductRef) -> Result<(), RefreshError> {
        let (nested, content) = match children(product) {
            Ok(children) => children,
            Err(err) => return self.reject(err),
        };
        for child in nested {
            self.visit_product(child)?;
        }
        for descriptor in content {
            self.visit_content(descriptor)?;
        }
        Ok(())
    }
}

/// Direct children of a product: the derived product, then provided products, then the
/// content of each product-content edge. `None` entries are skipped.
fn children(product: &ProductRef) -> Result<(Vec<ProductRef>, Vec<ContentRef>), RefreshError> {
    let nested = product
        .derived_product()
        .into_iter()
        .chain(product.provided_products().into_iter().flatten().flatten())
        .collect();

    let content = product
        .product_content()
        .into_iter()
        .flatten()
        .flatten()
        .map(|edge| {
            edge.content().ok_or_else(|| {
                RefreshError::invalid_argument(format!(
                    "product {} contains an incomplete product-content mapping",
                    product.id().unwrap_or_default()
                ))
            })
        })
        .collect::<Result<_, _>>()?;

    Ok((nested, content))
}
