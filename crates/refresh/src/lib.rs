//! `catalog-refresh`: the catalog refresh/reconciliation engine.
//!
//! Given upstream subscription/product/content descriptors, a refresh computes every
//! product and content they transitively reference, merges that set onto what the
//! organization already has, and persists the outcome as one retryable unit of work.
//!
//! ```text
//! Refresher::add_*        (InputCollector: dedup by natural id, most recent wins)
//!   ↓
//! GraphWalker             (closure over provided/derived products and content)
//!   ↓
//! TransactionCoordinator  (begin → resolve → merge → persist → commit, retry on conflict)
//!   ├─ IdentityResolver   (batched lookups by natural id)
//!   └─ EntityMerger       (create or update, re-point references)
//!   ↓
//! RefreshResult
//! ```
//!
//! The engine only creates and updates; it never deletes.

pub mod collector;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod merger;
pub mod refresher;
pub mod resolver;
pub mod result;
pub mod store;
pub mod walker;

#[cfg(test)]
mod test_support;

pub use collector::InputCollector;
pub use config::RefreshConfig;
pub use coordinator::{AttemptOutcome, Conflict, RefreshPhase, TransactionCoordinator};
pub use error::RefreshError;
pub use merger::{EntityMerger, MergePlan, Merged};
pub use refresher::Refresher;
pub use resolver::{ExistingEntities, IdentityResolver};
pub use result::{EntityState, RefreshResult};
pub use store::{CatalogStore, ConflictKind, StoreError};
pub use walker::{GraphWalker, WorkingSet};
