//! In-crate test double for `CatalogStore`.
//!
//! Writes apply immediately; `begin` snapshots the tables and `rollback` restores the
//! snapshot. Failures can be scripted per operation, and every call is counted.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use catalog_core::{CatalogEntity, NaturalId, OrgId};
use catalog_model::{Content, Product};

use crate::store::{CatalogStore, StoreError};

pub(crate) fn nid(id: &str) -> NaturalId {
    id.parse().unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum StoreOp {
    Begin,
    Commit,
    Rollback,
    FindProducts,
    FindContent,
    CreateProduct,
    UpdateProduct,
    CreateContent,
    UpdateContent,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<NaturalId, Product>,
    content: BTreeMap<NaturalId, Content>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    snapshot: Option<Tables>,
    calls: Vec<(StoreOp, Option<NaturalId>)>,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
    id_failures: HashMap<(StoreOp, NaturalId), VecDeque<StoreError>>,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    state: Mutex<State>,
    ignore_org: bool,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Lookups return matches from every org.
    pub(crate) fn ignoring_org(mut self) -> Self {
        self.ignore_org = true;
        self
    }

    pub(crate) fn seed_product(&self, product: Product) {
        let mut state = self.state.lock().unwrap();
        state.tables.products.insert(product.id().clone(), product);
    }

    pub(crate) fn seed_content(&self, content: Content) {
        let mut state = self.state.lock().unwrap();
        state.tables.content.insert(content.id().clone(), content);
    }

    /// Fail the next call of `op`. Queued failures are consumed in order.
    pub(crate) fn fail_next(&self, op: StoreOp, err: StoreError) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(op).or_default().push_back(err);
    }

    /// Fail the next write of `op` that targets `id`.
    pub(crate) fn fail_next_for(&self, op: StoreOp, id: &str, err: StoreError) {
        let mut state = self.state.lock().unwrap();
        state
            .id_failures
            .entry((op, nid(id)))
            .or_default()
            .push_back(err);
    }

    /// Open a transaction as if a caller owned it.
    pub(crate) fn begin_external(&self) {
        let mut state = self.state.lock().unwrap();
        state.snapshot = Some(state.tables.clone());
    }

    pub(crate) fn calls(&self, op: StoreOp) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.iter().filter(|(o, _)| *o == op).count()
    }

    pub(crate) fn calls_for(&self, op: StoreOp, id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .filter(|(o, target)| *o == op && target.as_ref().is_some_and(|t| t.as_str() == id))
            .count()
    }

    /// Total create/update calls.
    pub(crate) fn writes(&self) -> usize {
        [
            StoreOp::CreateProduct,
            StoreOp::UpdateProduct,
            StoreOp::CreateContent,
            StoreOp::UpdateContent,
        ]
        .into_iter()
        .map(|op| self.calls(op))
        .sum()
    }

    pub(crate) fn stored_product(&self, id: &str) -> Option<Product> {
        self.state.lock().unwrap().tables.products.get(id).cloned()
    }

    pub(crate) fn stored_content(&self, id: &str) -> Option<Content> {
        self.state.lock().unwrap().tables.content.get(id).cloned()
    }

    pub(crate) fn product_count(&self) -> usize {
        self.state.lock().unwrap().tables.products.len()
    }

    fn record(&self, op: StoreOp, id: Option<&NaturalId>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((op, id.cloned()));
        if let Some(id) = id {
            if let Some(err) = state
                .id_failures
                .get_mut(&(op, id.clone()))
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
        }
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn find<E: CatalogEntity + Clone>(
        &self,
        table: &BTreeMap<NaturalId, E>,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> BTreeMap<NaturalId, E> {
        ids.iter()
            .filter_map(|id| table.get(id).map(|e| (id.clone(), e.clone())))
            .filter(|(_, e)| self.ignore_org || e.org_id() == org_id)
            .collect()
    }
}

impl CatalogStore for ScriptedStore {
    fn in_transaction(&self) -> bool {
        self.state.lock().unwrap().snapshot.is_some()
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.record(StoreOp::Begin, None)?;
        self.begin_external();
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.record(StoreOp::Commit, None)?;
        self.state.lock().unwrap().snapshot = None;
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.record(StoreOp::Rollback, None)?;
        let mut state = self.state.lock().unwrap();
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        Ok(())
    }

    fn find_products_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Product>, StoreError> {
        self.record(StoreOp::FindProducts, None)?;
        let tables = self.state.lock().unwrap().tables.clone();
        Ok(self.find(&tables.products, org_id, ids))
    }

    fn find_content_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Content>, StoreError> {
        self.record(StoreOp::FindContent, None)?;
        let tables = self.state.lock().unwrap().tables.clone();
        Ok(self.find(&tables.content, org_id, ids))
    }

    fn create_product(&self, product: Product) -> Result<Product, StoreError> {
        self.record(StoreOp::CreateProduct, Some(product.id()))?;
        let mut state = self.state.lock().unwrap();
        if state.tables.products.contains_key(product.id()) {
            return Err(StoreError::unique_violation(format!(
                "product {} already exists",
                product.id()
            )));
        }
        state
            .tables
            .products
            .insert(product.id().clone(), product.clone());
        Ok(product)
    }

    fn update_product(&self, product: Product) -> Result<Product, StoreError> {
        self.record(StoreOp::UpdateProduct, Some(product.id()))?;
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .products
            .insert(product.id().clone(), product.clone());
        Ok(product)
    }

    fn create_content(&self, content: Content) -> Result<Content, StoreError> {
        self.record(StoreOp::CreateContent, Some(content.id()))?;
        let mut state = self.state.lock().unwrap();
        if state.tables.content.contains_key(content.id()) {
            return Err(StoreError::unique_violation(format!(
                "content {} already exists",
                content.id()
            )));
        }
        state
            .tables
            .content
            .insert(content.id().clone(), content.clone());
        Ok(content)
    }

    fn update_content(&self, content: Content) -> Result<Content, StoreError> {
        self.record(StoreOp::UpdateContent, Some(content.id()))?;
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .content
            .insert(content.id().clone(), content.clone());
        Ok(content)
    }
}
