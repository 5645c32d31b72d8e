//! Infrastructure layer: catalog persistence backends.
//!
//! - `InMemoryCatalogStore`: per-thread staged transactions, for tests and dev.
//! - `PostgresCatalogStore` (feature `postgres`): sqlx-backed store with SQLSTATE
//!   conflict classification.

pub mod catalog_store;

mod integration_tests;

pub use catalog_store::InMemoryCatalogStore;
#[cfg(feature = "postgres")]
pub use catalog_store::PostgresCatalogStore;
