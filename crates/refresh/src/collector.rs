//! Accumulation of refresh input.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::iter;

use tracing::debug;

use catalog_core::NaturalId;
use catalog_model::{ContentRef, ProductRef, SubscriptionRef};

use crate::error::RefreshError;
use crate::walker::{GraphWalker, WorkingSet};

/// Collects descriptors for a refresh, deduplicated by natural id.
///
/// Each `add_*` call is all-or-nothing: `None` entries are skipped, and if any
/// descriptor in the batch (or anything it transitively references) has a missing or
/// empty id, the call fails and the collector keeps its previous contents. Re-adding a
/// natural id replaces the earlier descriptor.
///
/// Only the new descriptors are validated on each add. The working set is computed on
/// the first read after a change and cached until the next one.
#[derive(Debug, Clone, Default)]
pub struct InputCollector {
    subscriptions: BTreeMap<NaturalId, SubscriptionRef>,
    products: BTreeMap<NaturalId, ProductRef>,
    content: BTreeMap<NaturalId, ContentRef>,
    closure: OnceCell<WorkingSet>,
}

impl InputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscriptions<I, T>(&mut self, subscriptions: I) -> Result<(), RefreshError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<SubscriptionRef>>,
    {
        let incoming = keyed(subscriptions, "subscription", |s: &SubscriptionRef| s.id())?;
        GraphWalker::check(incoming.iter().map(|(_, s)| s), iter::empty(), &self.products)?;
        merge(&mut self.subscriptions, incoming, "subscription");
        self.closure = OnceCell::new();
        Ok(())
    }

    pub fn add_products<I, T>(&mut self, products: I) -> Result<(), RefreshError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<ProductRef>>,
    {
        let incoming = keyed(products, "product", |p: &ProductRef| p.id())?;
        GraphWalker::check(iter::empty(), incoming.iter().map(|(_, p)| p), &self.products)?;
        merge(&mut self.products, incoming, "product");
        self.closure = OnceCell::new();
        Ok(())
    }

    pub fn add_content<I, T>(&mut self, content: I) -> Result<(), RefreshError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<ContentRef>>,
    {
        let incoming = keyed(content, "content", |c: &ContentRef| c.id())?;
        merge(&mut self.content, incoming, "content");
        self.closure = OnceCell::new();
        Ok(())
    }

    pub fn subscriptions(&self) -> &BTreeMap<NaturalId, SubscriptionRef> {
        &self.subscriptions
    }

    pub fn products(&self) -> &BTreeMap<NaturalId, ProductRef> {
        &self.products
    }

    pub fn content(&self) -> &BTreeMap<NaturalId, ContentRef> {
        &self.content
    }

    /// Everything reachable from the collected input.
    pub fn working_set(&self) -> &WorkingSet {
        self.closure.get_or_init(|| {
            GraphWalker::closure(&self.subscriptions, &self.products, &self.content)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.products.is_empty() && self.content.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn keyed<I, T, D, F>(items: I, label: &str, id_of: F) -> Result<Vec<(NaturalId, D)>, RefreshError>
where
    I: IntoIterator<Item = T>,
    T: Into<Option<D>>,
    F: Fn(&D) -> Option<&str>,
{
    items
        .into_iter()
        .filter_map(Into::into)
        .map(|item| Ok((NaturalId::parse(id_of(&item), label)?, item)))
        .collect()
}

fn merge<D>(current: &mut BTreeMap<NaturalId, D>, incoming: Vec<(NaturalId, D)>, label: &str) {
    for (id, item) in incoming {
        if current.insert(id.clone(), item).is_some() {
            debug!(kind = label, id = %id, "replacing previously added descriptor");
        }
    }
}
