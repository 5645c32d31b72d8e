//! Postgres-backed catalog store.
//!
//! Products and content are stored as JSONB documents keyed by surrogate uuid, with a
//! `UNIQUE (org_id, natural_id)` constraint that turns concurrent creates of the same
//! natural id into unique violations.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` | `Conflict(UniqueConstraintViolation)` | Concurrent create of the same natural id |
//! | `55P03` | `Conflict(LockTimeout)` | `lock_timeout` expired |
//! | `40P01` | `Conflict(LockTimeout)` | Deadlock detected |
//! | `40001` | `Conflict(LockTimeout)` | Serialization failure |
//! | Any other / non-database | `Backend` | Everything else |
//!
//! ## Runtime
//!
//! `CatalogStore` is synchronous. The store owns a current-thread tokio runtime and
//! blocks on it for every call, so it must not be used from inside an async context.
//! Open transactions are tracked per calling thread. The registry lock is never held
//! while a statement runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::runtime::Runtime;
use tracing::instrument;

use catalog_core::{CatalogEntity, NaturalId, OrgId};
use catalog_model::{Content, Product};
use catalog_refresh::{CatalogStore, ConflictKind, StoreError};

/// Environment variable holding the connection string for [`PostgresCatalogStore::from_env`].
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone, Copy)]
struct Table {
    name: &'static str,
}

const PRODUCTS: Table = Table {
    name: "catalog_products",
};

const CONTENT: Table = Table {
    name: "catalog_content",
};

/// Run `$body` (a future using `$conn: &mut PgConnection`) on the calling thread's open
/// transaction, or on a pooled connection when there is none.
///
/// The transaction is taken out of the registry while the query runs, so a statement
/// waiting on another thread's uncommitted row never holds the registry lock.
macro_rules! on_connection {
    ($store:expr, $operation:expr, |$conn:ident| $body:expr) => {{
        let thread = thread::current().id();
        let open = $store.lock_transactions()?.remove(&thread);
        let result = match open {
            Some(mut tx) => {
                let result = {
                    let $conn: &mut PgConnection = &mut *tx;
                    $store.runtime.block_on($body)
                };
                $store.lock_transactions()?.insert(thread, tx);
                result
            }
            None => $store.runtime.block_on(async {
                let mut pooled = $store.pool.acquire().await?;
                let $conn: &mut PgConnection = &mut *pooled;
                $body.await
            }),
        };
        result.map_err(|err| map_sqlx_error($operation, err))
    }};
}

pub struct PostgresCatalogStore {
    pool: PgPool,
    runtime: Runtime,
    transactions: Mutex<HashMap<ThreadId, Transaction<'static, Postgres>>>,
}

impl std::fmt::Debug for PostgresCatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCatalogStore")
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl PostgresCatalogStore {
    /// Connect and make sure the catalog tables exist.
    pub fn connect(database_url: &str) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime for catalog store")?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(8)
                    .connect(database_url),
            )
            .context("failed to connect to catalog database")?;

        let store = Self {
            pool,
            runtime,
            transactions: Mutex::new(HashMap::new()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Connect using `DATABASE_URL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var(DATABASE_URL_ENV)
            .with_context(|| format!("{DATABASE_URL_ENV} must be set for the Postgres catalog store"))?;
        Self::connect(&database_url)
    }

    pub fn ensure_schema(&self) -> anyhow::Result<()> {
        for table in [PRODUCTS, CONTENT] {
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {name} (
                    uuid UUID PRIMARY KEY,
                    org_id UUID NOT NULL,
                    natural_id TEXT NOT NULL,
                    body JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    UNIQUE (org_id, natural_id)
                )
                "#,
                name = table.name
            );
            self.runtime
                .block_on(sqlx::query(&ddl).execute(&self.pool))
                .with_context(|| format!("failed to create table {}", table.name))?;
        }
        Ok(())
    }

    fn lock_transactions(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<ThreadId, Transaction<'static, Postgres>>>, StoreError> {
        self.transactions
            .lock()
            .map_err(|_| StoreError::backend("transaction registry lock poisoned"))
    }

    fn find_by_ids<E: DeserializeOwned>(
        &self,
        table: Table,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, E>, StoreError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let raw_ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = on_connection!(self, "find_by_ids", |conn| select_bodies(
            conn, table, org_id, &raw_ids
        ))?;

        rows.into_iter()
            .map(|(id, body)| {
                let id = NaturalId::try_from(id)
                    .map_err(|e| StoreError::backend(format!("corrupt natural id: {e}")))?;
                let entity = serde_json::from_value(body).map_err(|e| {
                    StoreError::backend(format!("failed to decode {} row {id}: {e}", table.name))
                })?;
                Ok((id, entity))
            })
            .collect()
    }

    fn insert<E: CatalogEntity + Serialize>(
        &self,
        table: Table,
        entity: &E,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let row = Row::of(entity, created_at, updated_at)?;
        on_connection!(self, "insert", |conn| insert_row(conn, table, &row))
    }

    fn update<E: CatalogEntity + Serialize>(
        &self,
        table: Table,
        entity: &E,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let row = Row::of(entity, created_at, updated_at)?;
        let affected = on_connection!(self, "update", |conn| update_row(conn, table, &row))?;
        if affected == 0 {
            return Err(StoreError::backend(format!(
                "{} row {} not found",
                table.name, row.natural_id
            )));
        }
        Ok(())
    }
}

impl CatalogStore for PostgresCatalogStore {
    fn in_transaction(&self) -> bool {
        self.lock_transactions()
            .map(|txs| txs.contains_key(&thread::current().id()))
            .unwrap_or(false)
    }

    #[instrument(skip(self), err)]
    fn begin(&self) -> Result<(), StoreError> {
        let thread = thread::current().id();
        if self.lock_transactions()?.contains_key(&thread) {
            return Err(StoreError::backend("transaction already open on this thread"));
        }
        // Only this thread inserts under its own id, so the check above still holds.
        let tx = self
            .runtime
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin", e))?;
        self.lock_transactions()?.insert(thread, tx);
        Ok(())
    }

    #[instrument(skip(self), err)]
    fn commit(&self) -> Result<(), StoreError> {
        let tx = self
            .lock_transactions()?
            .remove(&thread::current().id())
            .ok_or_else(|| StoreError::backend("commit without an open transaction"))?;
        self.runtime
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), err)]
    fn rollback(&self) -> Result<(), StoreError> {
        let tx = self.lock_transactions()?.remove(&thread::current().id());
        match tx {
            Some(tx) => self
                .runtime
                .block_on(tx.rollback())
                .map_err(|e| map_sqlx_error("rollback", e)),
            None => Ok(()),
        }
    }

    #[instrument(skip(self, ids), fields(org_id = %org_id, ids = ids.len()), err)]
    fn find_products_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Product>, StoreError> {
        self.find_by_ids(PRODUCTS, org_id, ids)
    }

    #[instrument(skip(self, ids), fields(org_id = %org_id, ids = ids.len()), err)]
    fn find_content_by_ids(
        &self,
        org_id: OrgId,
        ids: &BTreeSet<NaturalId>,
    ) -> Result<BTreeMap<NaturalId, Content>, StoreError> {
        self.find_by_ids(CONTENT, org_id, ids)
    }

    #[instrument(skip(self, product), fields(id = %product.id()), err)]
    fn create_product(&self, product: Product) -> Result<Product, StoreError> {
        self.insert(PRODUCTS, &product, product.created_at(), product.updated_at())?;
        Ok(product)
    }

    #[instrument(skip(self, product), fields(id = %product.id()), err)]
    fn update_product(&self, product: Product) -> Result<Product, StoreError> {
        self.update(PRODUCTS, &product, product.created_at(), product.updated_at())?;
        Ok(product)
    }

    #[instrument(skip(self, content), fields(id = %content.id()), err)]
    fn create_content(&self, content: Content) -> Result<Content, StoreError> {
        self.insert(CONTENT, &content, content.created_at(), content.updated_at())?;
        Ok(content)
    }

    #[instrument(skip(self, content), fields(id = %content.id()), err)]
    fn update_content(&self, content: Content) -> Result<Content, StoreError> {
        self.update(CONTENT, &content, content.created_at(), content.updated_at())?;
        Ok(content)
    }
}

struct Row {
    uuid: uuid::Uuid,
    org_id: uuid::Uuid,
    natural_id: String,
    body: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Row {
    fn of<E: CatalogEntity + Serialize>(
        entity: &E,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let body = serde_json::to_value(entity).map_err(|e| {
            StoreError::backend(format!(
                "failed to encode {} {}: {e}",
                E::KIND,
                entity.natural_id()
            ))
        })?;
        Ok(Self {
            uuid: *entity.uuid().as_uuid(),
            org_id: *entity.org_id().as_uuid(),
            natural_id: entity.natural_id().as_str().to_string(),
            body,
            created_at,
            updated_at,
        })
    }
}

async fn select_bodies(
    conn: &mut PgConnection,
    table: Table,
    org_id: OrgId,
    ids: &[String],
) -> Result<Vec<(String, serde_json::Value)>, sqlx::Error> {
    let sql = format!(
        "SELECT natural_id, body FROM {} WHERE org_id = $1 AND natural_id = ANY($2)",
        table.name
    );
    sqlx::query_as::<_, (String, serde_json::Value)>(&sql)
        .bind(org_id.as_uuid())
        .bind(ids)
        .fetch_all(conn)
        .await
}

async fn insert_row(conn: &mut PgConnection, table: Table, row: &Row) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} (uuid, org_id, natural_id, body, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
        table.name
    );
    sqlx::query(&sql)
        .bind(row.uuid)
        .bind(row.org_id)
        .bind(&row.natural_id)
        .bind(&row.body)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(conn)
        .await?;
    Ok(())
}

async fn update_row(conn: &mut PgConnection, table: Table, row: &Row) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET body = $3, updated_at = $4 WHERE org_id = $1 AND natural_id = $2",
        table.name
    );
    let done = sqlx::query(&sql)
        .bind(row.org_id)
        .bind(&row.natural_id)
        .bind(&row.body)
        .bind(row.updated_at)
        .execute(conn)
        .await?;
    Ok(done.rows_affected())
}

/// Conflict class for a PostgreSQL SQLSTATE, if it is one.
fn conflict_kind(code: &str) -> Option<ConflictKind> {
    match code {
        "23505" => Some(ConflictKind::UniqueConstraintViolation),
        "55P03" | "40P01" | "40001" => Some(ConflictKind::LockTimeout),
        _ => None,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref().and_then(conflict_kind) {
                Some(kind) => StoreError::Conflict { kind, message: msg },
                None => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::backend(format!("sqlx error in {operation}: {err}")),
    }
}
