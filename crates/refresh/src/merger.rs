//! Entity merge: apply descriptors onto existing entities, or create new ones.
//!
//! Surrogate ids are assigned for the whole working set up front (the existing uuid when
//! the natural id is already persisted, a fresh one otherwise). References can then be
//! re-pointed to the canonical instance before it is written, which also covers cyclic
//! product graphs. Content is merged before products, and products are ordered
//! children-first so that persisting the plan front to back never writes a product ahead
//! of one it points at, cycles aside.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::trace;

use catalog_core::{CatalogEntity, DomainError, EntityKind, EntityUuid, NaturalId, OrgId};
use catalog_model::{Content, EntityRef, Product, ReferenceResolver};

use crate::error::RefreshError;
use crate::resolver::ExistingEntities;
use crate::result::EntityState;
use crate::walker::WorkingSet;

/// One merged entity and the state it ends up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged<T> {
    pub entity: T,
    pub state: EntityState,
}

/// Entities to persist, in write order.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub content: Vec<Merged<Content>>,
    pub products: Vec<Merged<Product>>,
}

impl MergePlan {
    pub fn pending_writes(&self) -> usize {
        self.content
            .iter()
            .map(|m| m.state)
            .chain(self.products.iter().map(|m| m.state))
            .filter(|state| *state != EntityState::Unchanged)
            .count()
    }
}

pub struct EntityMerger {
    org_id: OrgId,
    now: DateTime<Utc>,
}

impl EntityMerger {
    pub fn new(org_id: OrgId, now: DateTime<Utc>) -> Self {
        Self { org_id, now }
    }

    pub fn merge(
        &self,
        working_set: &WorkingSet,
        mut existing: ExistingEntities,
    ) -> Result<MergePlan, RefreshError> {
        let assigned = AssignedIds {
            products: assign_uuids(working_set.products().keys(), &existing.products),
            content: assign_uuids(working_set.content().keys(), &existing.content),
        };

        let mut plan = MergePlan::default();

        for (id, uuid) in &assigned.content {
            let current = existing.content.remove(id);
            let merged = match working_set.content().get(id) {
                Some(descriptor) => {
                    let mut next = current.clone().unwrap_or_else(|| {
                        Content::new(self.org_id, *uuid, id.clone(), self.now)
                    });
                    next.apply_changes(descriptor.as_ref());
                    Some(self.settle(next, current, Content::same_state_as, Content::touch))
                }
                None => unchanged(current),
            };
            if let Some(merged) = merged {
                trace!(id = %id, state = ?merged.state, "merged content");
                plan.content.push(merged);
            }
        }

        for id in product_order(working_set, &existing.products, &assigned.products) {
            let current = existing.products.remove(&id);
            let merged = match working_set.products().get(&id) {
                Some(descriptor) => {
                    let uuid = assigned.products[&id];
                    let mut next = current.clone().unwrap_or_else(|| {
                        Product::new(self.org_id, uuid, id.clone(), self.now)
                    });
                    next.apply_changes(descriptor.as_ref(), &assigned)
                        .map_err(|err| self.merge_failure(EntityKind::Product, &id, err))?;
                    Some(self.settle(next, current, Product::same_state_as, Product::touch))
                }
                None => unchanged(current),
            };
            if let Some(merged) = merged {
                trace!(id = %id, state = ?merged.state, "merged product");
                plan.products.push(merged);
            }
        }

        Ok(plan)
    }

    fn settle<T>(
        &self,
        mut next: T,
        current: Option<T>,
        same_state: fn(&T, &T) -> bool,
        touch: fn(&mut T, DateTime<Utc>),
    ) -> Merged<T> {
        match current {
            None => Merged {
                entity: next,
                state: EntityState::Created,
            },
            // Unchanged entities keep their stored instance, timestamps included.
            Some(current) if same_state(&next, &current) => Merged {
                entity: current,
                state: EntityState::Unchanged,
            },
            Some(_) => {
                touch(&mut next, self.now);
                Merged {
                    entity: next,
                    state: EntityState::Updated,
                }
            }
        }
    }

    fn merge_failure(&self, kind: EntityKind, id: &NaturalId, err: DomainError) -> RefreshError {
        match err {
            DomainError::InvariantViolation(message) => RefreshError::Unexpected {
                org_id: self.org_id,
                kind: Some(kind),
                id: Some(id.clone()),
                message,
            },
            other => RefreshError::InvalidArgument(other.to_string()),
        }
    }
}

fn unchanged<T>(current: Option<T>) -> Option<Merged<T>> {
    current.map(|entity| Merged {
        entity,
        state: EntityState::Unchanged,
    })
}

fn assign_uuids<'a, E: CatalogEntity>(
    wanted: impl Iterator<Item = &'a NaturalId>,
    existing: &BTreeMap<NaturalId, E>,
) -> BTreeMap<NaturalId, EntityUuid> {
    let mut assigned: BTreeMap<NaturalId, EntityUuid> = existing
        .iter()
        .map(|(id, entity)| (id.clone(), entity.uuid()))
        .collect();
    for id in wanted {
        assigned
            .entry(id.clone())
            .or_insert_with(EntityUuid::new);
    }
    assigned
}

/// Canonical instance per natural id for the duration of one merge.
struct AssignedIds {
    products: BTreeMap<NaturalId, EntityUuid>,
    content: BTreeMap<NaturalId, EntityUuid>,
}

impl ReferenceResolver for AssignedIds {
    fn product_ref(&self, id: &str) -> Option<EntityRef> {
        self.products
            .get_key_value(id)
            .map(|(id, uuid)| EntityRef::new(id.clone(), *uuid))
    }

    fn content_ref(&self, id: &str) -> Option<EntityRef> {
        self.content
            .get_key_value(id)
            .map(|(id, uuid)| EntityRef::new(id.clone(), *uuid))
    }
}

/// Children-first order over every product id known to the merge. Cycles are cut at the
/// first back edge; iteration order is by natural id so the result is deterministic.
fn product_order(
    working_set: &WorkingSet,
    existing: &BTreeMap<NaturalId, Product>,
    known: &BTreeMap<NaturalId, EntityUuid>,
) -> Vec<NaturalId> {
    let children = |id: &NaturalId| -> BTreeSet<NaturalId> {
        let mut out = BTreeSet::new();
        if let Some(descriptor) = working_set.products().get(id) {
            let nested = descriptor
                .provided_products()
                .into_iter()
                .flatten()
                .flatten()
                .chain(descriptor.derived_product());
            for child in nested {
                if let Some(child_id) = child.id().and_then(|raw| NaturalId::try_from(raw).ok()) {
                    out.insert(child_id);
                }
            }
        }
        if let Some(product) = existing.get(id) {
            out.extend(product.referenced_product_ids().cloned());
        }
        out.retain(|child| known.contains_key(child));
        out
    };

    let mut order = Vec::with_capacity(known.len());
    let mut visited: BTreeSet<NaturalId> = BTreeSet::new();

    for root in known.keys() {
        if !visited.insert(root.clone()) {
            continue;
        }
        // (node, children still to visit)
        let mut stack: Vec<(NaturalId, Vec<NaturalId>)> =
            vec![(root.clone(), children(root).into_iter().rev().collect())];

        while let Some((_, remaining)) = stack.last_mut() {
            match remaining.pop() {
                Some(child) => {
                    if visited.insert(child.clone()) {
                        let grandchildren = children(&child).into_iter().rev().collect();
                        stack.push((child, grandchildren));
                    }
                }
                None => {
                    if let Some((node, _)) = stack.pop() {
                        order.push(node);
                    }
                }
            }
        }
    }

    order
}
