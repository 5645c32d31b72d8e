//! Unit-of-work and retry control for one refresh.
//!
//! ```text
//! Init → Resolving → Merging → Persisting → Success
//!            ↑                      │ conflict, attempts left
//!            └─────── Retry ←───────┘
//! any step ──(conflict, no attempts left | fatal error)──→ Failed
//! ```
//!
//! When the caller already has a transaction open, the refresh runs once inside it: no
//! begin, commit, rollback or retry happens here, and a conflict is reported as
//! [`RefreshError::NestedTransactionConflict`] for the transaction owner to handle.

use std::cell::Cell;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use catalog_core::{CatalogEntity, EntityKind, NaturalId, OrgId};

use crate::config::RefreshConfig;
use crate::error::RefreshError;
use crate::merger::{EntityMerger, MergePlan};
use crate::resolver::IdentityResolver;
use crate::result::{EntityState, RefreshResult};
use crate::store::{CatalogStore, ConflictKind, StoreError};
use crate::walker::WorkingSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Init,
    Resolving,
    Merging,
    Persisting,
    Retry,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub message: String,
}

/// Tagged outcome of a persistence call or of a whole attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    ConflictRetryable(Conflict),
    Fatal(RefreshError),
}

impl<T> AttemptOutcome<T> {
    /// Classify a store result. Conflicts are retryable, anything else is fatal and
    /// carries the org and (when known) the entity being written.
    pub fn classify(
        result: Result<T, StoreError>,
        org_id: OrgId,
        kind: Option<EntityKind>,
        id: Option<&NaturalId>,
    ) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(StoreError::Conflict { kind, message }) => {
                AttemptOutcome::ConflictRetryable(Conflict { kind, message })
            }
            Err(StoreError::Backend(message)) => AttemptOutcome::Fatal(RefreshError::Unexpected {
                org_id,
                kind,
                id: id.cloned(),
                message,
            }),
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> AttemptOutcome<U> {
        match self {
            AttemptOutcome::Success(value) => AttemptOutcome::Success(f(value)),
            AttemptOutcome::ConflictRetryable(conflict) => {
                AttemptOutcome::ConflictRetryable(conflict)
            }
            AttemptOutcome::Fatal(err) => AttemptOutcome::Fatal(err),
        }
    }
}

/// Unwrap a successful outcome or return the failure from the enclosing function.
macro_rules! try_outcome {
    ($outcome:expr) => {
        match $outcome {
            AttemptOutcome::Success(value) => value,
            AttemptOutcome::ConflictRetryable(conflict) => {
                return AttemptOutcome::ConflictRetryable(conflict);
            }
            AttemptOutcome::Fatal(err) => return AttemptOutcome::Fatal(err),
        }
    };
}

pub struct TransactionCoordinator<'s, S: ?Sized> {
    store: &'s S,
    config: RefreshConfig,
    phase: Cell<RefreshPhase>,
}

impl<'s, S: CatalogStore + ?Sized> TransactionCoordinator<'s, S> {
    pub fn new(store: &'s S, config: RefreshConfig) -> Self {
        Self {
            store,
            config,
            phase: Cell::new(RefreshPhase::Init),
        }
    }

    /// Last phase reached; `Success` or `Failed` once `execute` has returned.
    pub fn phase(&self) -> RefreshPhase {
        self.phase.get()
    }

    #[instrument(
        skip(self, working_set),
        fields(
            org_id = %org_id,
            products = working_set.products().len(),
            content = working_set.content().len(),
        )
    )]
    pub fn execute(
        &self,
        org_id: OrgId,
        working_set: &WorkingSet,
    ) -> Result<RefreshResult, RefreshError> {
        let caller_owned = self.store.in_transaction();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = if caller_owned {
                self.run_attempt(org_id, working_set, attempt)
            } else {
                self.run_owned_attempt(org_id, working_set, attempt)
            };

            match outcome {
                AttemptOutcome::Success(result) => {
                    self.enter(RefreshPhase::Success, attempt);
                    info!(
                        attempt,
                        products = result.products().len(),
                        content = result.content().len(),
                        states = ?result.state_counts(),
                        "refresh completed"
                    );
                    return Ok(result);
                }
                AttemptOutcome::ConflictRetryable(Conflict { kind, message }) if caller_owned => {
                    self.enter(RefreshPhase::Failed, attempt);
                    warn!(%kind, %message, "conflict inside caller-owned transaction");
                    return Err(RefreshError::NestedTransactionConflict {
                        org_id,
                        kind,
                        message,
                    });
                }
                AttemptOutcome::ConflictRetryable(Conflict { kind, message }) => {
                    if attempt >= self.config.max_attempts() {
                        self.enter(RefreshPhase::Failed, attempt);
                        error!(attempt, %kind, %message, "refresh retries exhausted");
                        return Err(RefreshError::ConflictExhausted {
                            org_id,
                            attempts: attempt,
                            kind,
                            message,
                        });
                    }
                    self.enter(RefreshPhase::Retry, attempt);
                    warn!(attempt, %kind, %message, "refresh conflicted, retrying");
                }
                AttemptOutcome::Fatal(err) => {
                    self.enter(RefreshPhase::Failed, attempt);
                    error!(attempt, error = %err, "refresh failed");
                    return Err(err);
                }
            }
        }
    }

    /// begin → attempt → commit, rolling back on any failure.
    fn run_owned_attempt(
        &self,
        org_id: OrgId,
        working_set: &WorkingSet,
        attempt: u32,
    ) -> AttemptOutcome<RefreshResult> {
        try_outcome!(AttemptOutcome::classify(
            self.store.begin(),
            org_id,
            None,
            None
        ));

        let result = match self.run_attempt(org_id, working_set, attempt) {
            AttemptOutcome::Success(result) => result,
            failure => {
                self.rollback(attempt);
                return failure;
            }
        };

        match AttemptOutcome::classify(self.store.commit(), org_id, None, None) {
            AttemptOutcome::Success(()) => AttemptOutcome::Success(result),
            failure => {
                self.rollback(attempt);
                failure.map(|()| result)
            }
        }
    }

    /// resolve → merge → persist, inside whatever unit of work is open.
    fn run_attempt(
        &self,
        org_id: OrgId,
        working_set: &WorkingSet,
        attempt: u32,
    ) -> AttemptOutcome<RefreshResult> {
        self.enter(RefreshPhase::Resolving, attempt);
        let existing = try_outcome!(AttemptOutcome::classify(
            IdentityResolver::new(self.store, org_id).resolve(working_set),
            org_id,
            None,
            None,
        ));

        self.enter(RefreshPhase::Merging, attempt);
        let plan = match EntityMerger::new(org_id, Utc::now()).merge(working_set, existing) {
            Ok(plan) => plan,
            Err(err) => return AttemptOutcome::Fatal(err),
        };

        self.enter(RefreshPhase::Persisting, attempt);
        self.persist(org_id, plan)
    }

    fn persist(&self, org_id: OrgId, plan: MergePlan) -> AttemptOutcome<RefreshResult> {
        debug!(writes = plan.pending_writes(), "persisting merge plan");
        let mut result = RefreshResult::new();

        for merged in plan.content {
            let id = merged.entity.natural_id().clone();
            let content = match merged.state {
                EntityState::Created => try_outcome!(AttemptOutcome::classify(
                    self.store.create_content(merged.entity),
                    org_id,
                    Some(EntityKind::Content),
                    Some(&id),
                )),
                EntityState::Updated => try_outcome!(AttemptOutcome::classify(
                    self.store.update_content(merged.entity),
                    org_id,
                    Some(EntityKind::Content),
                    Some(&id),
                )),
                EntityState::Unchanged => merged.entity,
            };
            result.record_content(content, merged.state);
        }

        for merged in plan.products {
            let id = merged.entity.natural_id().clone();
            let product = match merged.state {
                EntityState::Created => try_outcome!(AttemptOutcome::classify(
                    self.store.create_product(merged.entity),
                    org_id,
                    Some(EntityKind::Product),
                    Some(&id),
                )),
                EntityState::Updated => try_outcome!(AttemptOutcome::classify(
                    self.store.update_product(merged.entity),
                    org_id,
                    Some(EntityKind::Product),
                    Some(&id),
                )),
                EntityState::Unchanged => merged.entity,
            };
            result.record_product(product, merged.state);
        }

        AttemptOutcome::Success(result)
    }

    fn rollback(&self, attempt: u32) {
        if let Err(err) = self.store.rollback() {
            error!(attempt, error = %err, "rollback failed");
        }
    }

    fn enter(&self, phase: RefreshPhase, attempt: u32) {
        debug!(attempt, from = ?self.phase.get(), to = ?phase, "refresh phase");
        self.phase.set(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedStore, StoreOp};
    use crate::walker::GraphWalker;
    use catalog_model::ProductData;
    use std::collections::BTreeMap;

    fn single_product() -> WorkingSet {
        let products = [("pid-1", ProductData::new("pid-1").shared())]
            .into_iter()
            .map(|(id, p)| (id.parse().unwrap(), p))
            .collect();
        GraphWalker::walk(&BTreeMap::new(), &products, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn owned_attempt_commits_once() {
        let store = ScriptedStore::new();
        let coordinator = TransactionCoordinator::new(&store, RefreshConfig::default());

        coordinator.execute(OrgId::new(), &single_product()).unwrap();

        assert_eq!(coordinator.phase(), RefreshPhase::Success);
        assert_eq!(store.calls(StoreOp::Begin), 1);
        assert_eq!(store.calls(StoreOp::Commit), 1);
        assert_eq!(store.calls(StoreOp::Rollback), 0);
    }

    #[test]
    fn conflicting_commit_is_rolled_back_and_retried() {
        let store = ScriptedStore::new();
        store.fail_next(StoreOp::Commit, StoreError::lock_timeout("serialization failure"));
        let coordinator = TransactionCoordinator::new(&store, RefreshConfig::default());

        let result = coordinator.execute(OrgId::new(), &single_product()).unwrap();

        assert_eq!(result.products().len(), 1);
        assert_eq!(store.calls(StoreOp::Begin), 2);
        assert_eq!(store.calls(StoreOp::Rollback), 1);
        assert_eq!(store.calls(StoreOp::Commit), 2);
    }

    #[test]
    fn zero_retries_fails_on_first_conflict() {
        let store = ScriptedStore::new();
        store.fail_next(StoreOp::CreateProduct, StoreError::unique_violation("dup"));
        let coordinator =
            TransactionCoordinator::new(&store, RefreshConfig::default().with_max_retries(0));

        let err = coordinator.execute(OrgId::new(), &single_product()).unwrap_err();

        assert!(matches!(err, RefreshError::ConflictExhausted { attempts: 1, .. }));
        assert_eq!(coordinator.phase(), RefreshPhase::Failed);
        assert_eq!(store.calls(StoreOp::Rollback), 1);
    }

    #[test]
    fn failing_lookup_is_fatal_and_not_retried() {
        let store = ScriptedStore::new();
        store.fail_next(StoreOp::FindProducts, StoreError::backend("connection reset"));
        let coordinator = TransactionCoordinator::new(&store, RefreshConfig::default());

        let err = coordinator.execute(OrgId::new(), &single_product()).unwrap_err();

        match err {
            RefreshError::Unexpected { kind: None, message, .. } => {
                assert!(message.contains("connection reset"))
            }
            other => panic!("expected Unexpected, got {other:?}"),
        }
        assert_eq!(store.calls(StoreOp::Begin), 1);
        assert_eq!(store.calls(StoreOp::Rollback), 1);
    }

    #[test]
    fn failing_begin_never_rolls_back() {
        let store = ScriptedStore::new();
        store.fail_next(StoreOp::Begin, StoreError::backend("pool exhausted"));
        let coordinator = TransactionCoordinator::new(&store, RefreshConfig::default());

        let err = coordinator.execute(OrgId::new(), &single_product()).unwrap_err();

        assert!(matches!(err, RefreshError::Unexpected { .. }));
        assert_eq!(store.calls(StoreOp::Rollback), 0);
        assert_eq!(store.calls(StoreOp::FindProducts), 0);
    }
}
