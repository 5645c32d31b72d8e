//! `CatalogStore` backends.

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryCatalogStore;
#[cfg(feature = "postgres")]
pub use postgres::{DATABASE_URL_ENV, PostgresCatalogStore};
