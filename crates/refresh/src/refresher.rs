//! Public entry point for one refresh.

use std::collections::BTreeMap;

use catalog_core::{NaturalId, OrgId};
use catalog_model::{ContentRef, ProductRef, SubscriptionRef};

use crate::collector::InputCollector;
use crate::config::RefreshConfig;
use crate::coordinator::TransactionCoordinator;
use crate::error::RefreshError;
use crate::result::RefreshResult;
use crate::store::CatalogStore;

/// Builds up refresh input and executes it against a store.
///
/// A `Refresher` holds its own input and nothing else; construct one per refresh so
/// that concurrent refreshes for different organizations never share state.
///
/// ```ignore
/// let result = Refresher::new(store)
///     .add_subscriptions(subscriptions)?
///     .add_products(extra_products)?
///     .execute(org_id)?;
/// ```
pub struct Refresher<S> {
    store: S,
    config: RefreshConfig,
    input: InputCollector,
}

impl<S: CatalogStore> Refresher<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: RefreshConfig::default(),
            input: InputCollector::new(),
        }
    }

    pub fn with_config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    /// Add subscriptions; their products (and everything those reference) join the
    /// refresh. `None` entries are ignored.
    pub fn add_subscriptions<I, T>(&mut self, subscriptions: I) -> Result<&mut Self, RefreshError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<SubscriptionRef>>,
    {
        self.input.add_subscriptions(subscriptions)?;
        Ok(self)
    }

    pub fn add_products<I, T>(&mut self, products: I) -> Result<&mut Self, RefreshError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<ProductRef>>,
    {
        self.input.add_products(products)?;
        Ok(self)
    }

    pub fn add_content<I, T>(&mut self, content: I) -> Result<&mut Self, RefreshError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<ContentRef>>,
    {
        self.input.add_content(content)?;
        Ok(self)
    }

    /// Snapshot of the subscriptions added so far.
    pub fn subscriptions(&self) -> BTreeMap<NaturalId, SubscriptionRef> {
        self.input.subscriptions().clone()
    }

    /// Snapshot of every product the refresh will reconcile, including nested ones.
    pub fn products(&self) -> BTreeMap<NaturalId, ProductRef> {
        self.input.working_set().products().clone()
    }

    /// Snapshot of every content the refresh will reconcile, including nested ones.
    pub fn content(&self) -> BTreeMap<NaturalId, ContentRef> {
        self.input.working_set().content().clone()
    }

    pub fn clear(&mut self) -> &mut Self {
        self.input.clear();
        self
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile the collected input against `org_id`'s catalog.
    pub fn execute(&self, org_id: OrgId) -> Result<RefreshResult, RefreshError> {
        TransactionCoordinator::new(&self.store, self.config.clone())
            .execute(org_id, self.input.working_set())
    }
}
