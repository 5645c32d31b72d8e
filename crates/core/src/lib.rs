//! `catalog-core`: shared building blocks for the subscription catalog.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, entity kinds, and the domain error model.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{CatalogEntity, EntityKind};
pub use error::{DomainError, DomainResult};
pub use id::{EntityUuid, NaturalId, OrgId};
