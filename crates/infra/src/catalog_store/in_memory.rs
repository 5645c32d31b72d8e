use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use tracing::debug;

use catalog_core::{CatalogEntity, NaturalId, OrgId};
use catalog_model::{Content, Product};
use catalog_refresh::{CatalogStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    org_id: OrgId,
    id: NaturalId,
}

impl RowKey {
    fn of<E: CatalogEntity>(entity: &E) -> Self {
        Self {
            org_id: entity.org_id(),
            id: entity.natural_id().clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<RowKey, Product>,
    content: HashMap<RowKey, Content>,
}

#[derive(Debug, Clone)]
enum StagedWrite {
    CreateProduct(Product),
    UpdateProduct(Product),
    CreateContent(Content),
    UpdateContent(Content),
}

/// In-memory catalog store with per-thread units of work.
///
/// Outside a transaction every write commits immediately. Inside one, writes are staged
/// for the calling thread, visible to that thread's lookups, and applied atomically on
/// `commit`. Natural ids are unique per org: a create fails with a unique-constraint
/// conflict when the row already exists, and `commit` re-checks staged creates against
/// rows committed by other threads in the meantime.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    committed: RwLock<Tables>,
    staged: Mutex<HashMap<ThreadId, Vec<StagedWrite>>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed product, ignoring any staged writes.
    pub fn product(&self, org_id: OrgId, id: &str) -> Option<Product> {
        let key = RowKey {
            org_id,
            id: NaturalId::try_from(id).ok()?,
        };
        self.committed.read().ok()?.products.get(&key).cloned()
    }

    /// Committed content, ignoring any staged writes.
    pub fn content(&self, org_id: OrgId, id: &str) -> Option<Content> {
        let key = RowKey {
            org_id,
            id: NaturalId::try_from(id).ok()?,
        };
        self.committed.read().ok()?.content.get(&key).cloned()
    }

    pub fn product_count(&self, org_id: OrgId) -> usize {
        self.committed
            .read()
            .map(|t| t.products.keys().filter(|k| k.org_id == org_id).count())
            .unwrap_or(0)
    }

    pub fn content_count(&self, org_id: OrgId) -> usize {
        self.committed
            .read()
            .map(|t| t.content.keys().filter(|k| k.org_id == org_id).count())
            .unwrap_or(0)
    }

    fn lock_staged(&self) -> Result<MutexGuard<'_, HashMap<ThreadId, Vec<StagedWrite>>>, StoreError> {
        self.staged
            .lock()
            .map_err(|_| StoreError::backend("staging lock poisoned"))
    }

    /// Staged writes of the current thread, in write order. Empty outside a transaction.
    fn own_staged(&self) -> Result<Vec<StagedWrite>, StoreError> {
        let staged = self.lock_staged()?;
        Ok(staged.get(&thread::current().id()).cloned().unwrap_or_default())
    }

    /// Stage `write` if the current thread has a transaction open. Returns the write back
    /// when it must be applied directly instead.
    fn stage(&self, write: StagedWrite) -> Result<Option<StagedWrite>, StoreError> {
        let mut staged = self.lock_staged()?;
        match staged.get_mut(&thread::current().id()) {
            Some(writes) => {
                writes.push(write);
                Ok(None)
            }
            None => Ok(Some(write)),
        }
    }

    fn staged_contains(writes: &[StagedWrite], key: &RowKey, products: bool) -> bool {
        writes.iter().any(|w| match w {
            StagedWrite::CreateProduct(p) | StagedWrite::UpdateProduct(p) if products => {
                RowKey::of(p) == *key
            }
            StagedWrite::CreateContent(c) | StagedWrite::UpdateContent(c) if !products => {
                RowKey::of(c) == *key
            }
            _ => false,
        })
    }

    /// Check one write against committed rows.
    fn check(tables: &Tables, write: &StagedWrite) -> Result<(), StoreError> {
        match write {
            StagedWrite::CreateProduct(p) if tables.products.contains_key(&RowKey::of(p)) => Err(
                StoreError::unique_violation(format!("product {} already exists", p.id())),
            ),
            StagedWrite::CreateContent(c) if tables.content.contains_key(&RowKey::of(c)) => Err(
                StoreError::unique_violation(format!("content {} already exists", c.id())),
            ),
            _ => Ok(()),
        }
    }

    fn apply(tables: &mut Tables, write: StagedWrite) {
        match write {
            StagedWrite::CreateProduct(p) | StagedWrite::UpdateProduct(p) => {
                tables.products.insert(RowKey::of(&p), p);
            }
            StagedWrite::CreateContent(c) | StagedWrite::UpdateContent(c) => {
                tables.content.insert(RowKey::of(&c), c);
            }
        }
    }

    fn write(&self, write: StagedWrite) -> Result<(), StoreError> {
        let key_exists = {
            let tables = self
                .committed
                .read()
                .map_err(|_| StoreError::backend("catalog lock poisoned"))?;
            let own = self.own_staged()?;
            match &write {
                StagedWrite::CreateProduct(p) | StagedWrite::UpdateProduct(p) => {
                    let key = RowKey::of(p);
                    tables.products.contains_key(&key) || Self::staged_contains(&own, &key, true)
                }
                StagedWrite::CreateContent(c) | StagedWrite::UpdateContent(c) => {
                    let key = RowKey::of(c);
                    tables.content.contains_key(&key) || Self::staged_contains(&own, &key, false)
                }
            }
        };

        match &write {
            StagedWrite::CreateProduct(p) if key_exists => {
                return Err(StoreError::unique_violation(format!(
                    "product {} already exists",
                    p.id()
                )));
            }
            StagedWrite::CreateContent(c) if key_exists => {
                return Err(StoreError::unique_violation(format!(
                    "content {} already exists",
                    c.id()
                )));
            }
            StagedWrite::UpdateProduct(p) if !key_exists => {
                return Err(StoreError::backend(format!("product {} not found", p.id())));
            }
            StagedWrite::UpdateContent(c) if !key_exists => {
                return Err(StoreError::backend(format!("content {} not found", c.id())));
            }
            _ => {}
        }

        if let Some(write) = self.stage(write)? {
            let mut tables = self
                .committed
                .write()
                .map_err(|_| StoreError::backend("catalog lock poisoned"))?;
            // Re-check under the write lock: another thread may have committed meanwhile.
            Self::check(&tables, &write)?;
            Self::apply(&mut tables, write);
        }
        Ok(())
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn in_transaction(&self) -> bool {
        self.lock_staged()
            .map(|staged| staged.contains_key(&thread::current().id()))
            .unwrap_or(false)
    }

    fn begin(&self) -> Result<(), StoreError> {
        let mut staged = self.lock_staged()?;
        let thread = thread::current().id();
        if staged.contains_key(&thread) {
            return Err(StoreError::backend("transaction already open on this thread"));
        }
        staged.insert(thread, Vec::new());
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let writes = self
            .lock_staged()?
            .remove(&thread::current().id())
            .ok_or_else(|| StoreError::backend("commit without an open transaction"))?;

        let mut tables = self
            .committed
            .write()
            .map_err(|_| StoreError::backend("catalog lock poisoned"))?;

        for write in &writes {
            Self::check(&tables, write)?;
        }

        debug!(writes = writes.len(), "committing staged catalog writes");
        for write in writes {
            Self::apply(&mut tables, write);
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        if let Some(writes) = self.lock_staged()?.remove(&thread::current().id()) {
            debug!(discarded = writes.len(), "rolled back staged catalog writes");
        }
        Ok(())
    }

    fn find_products_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Product>, StoreError> {
        let mut found: BTreeMap<NaturalId, Product> = {
            let tables = self
                .committed
                .read()
                .map_err(|_| StoreError::backend("catalog lock poisoned"))?;
            ids.iter()
                .filter_map(|id| {
                    let key = RowKey {
                        org_id,
                        id: id.clone(),
                    };
                    tables.products.get(&key).map(|p| (id.clone(), p.clone()))
                })
                .collect()
        };

        for write in self.own_staged()? {
            if let StagedWrite::CreateProduct(p) | StagedWrite::UpdateProduct(p) = write {
                if p.org_id() == org_id && ids.contains(p.id()) {
                    found.insert(p.id().clone(), p);
                }
            }
        }
        Ok(found)
    }

    fn find_content_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Content>, StoreError> {
        let mut found: BTreeMap<NaturalId, Content> = {
            let tables = self
                .committed
                .read()
                .map_err(|_| StoreError::backend("catalog lock poisoned"))?;
            ids.iter()
                .filter_map(|id| {
                    let key = RowKey {
                        org_id,
                        id: id.clone(),
                    };
                    tables.content.get(&key).map(|c| (id.clone(), c.clone()))
                })
                .collect()
        };

        for write in self.own_staged()? {
            if let StagedWrite::CreateContent(c) | StagedWrite::UpdateContent(c) = write {
                if c.org_id() == org_id && ids.contains(c.id()) {
                    found.insert(c.id().clone(), c);
                }
            }
        }
        Ok(found)
    }

    fn create_product(&self, product: Product) -> Result<Product, StoreError> {
        self.write(StagedWrite::CreateProduct(product.clone()))?;
        Ok(product)
    }

    fn update_product(&self, product: Product) -> Result<Product, StoreError> {
        self.write(StagedWrite::UpdateProduct(product.clone()))?;
        Ok(product)
    }

    fn create_content(&self, content: Content) -> Result<Content, StoreError> {
        self.write(StagedWrite::CreateContent(content.clone()))?;
        Ok(content)
    }

    fn update_content(&self, content: Content) -> Result<Content, StoreError> {
        self.write(StagedWrite::UpdateContent(content.clone()))?;
        Ok(content)
    }
}
