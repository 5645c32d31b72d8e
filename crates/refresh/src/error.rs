use thiserror::Error;

use catalog_core::{DomainError, EntityKind, NaturalId, OrgId};

use crate::store::ConflictKind;

/// Failures surfaced by a refresh.
///
/// `ConflictExhausted` and `NestedTransactionConflict` are transient: nothing was left
/// half-written by the engine, and the caller may invoke the refresh again.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Malformed caller input, reported before any persistence happens.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("refresh of org {org_id} still conflicting after {attempts} attempts ({kind}): {message}")]
    ConflictExhausted {
        org_id: OrgId,
        attempts: u32,
        kind: ConflictKind,
        message: String,
    },

    /// A conflict inside a unit of work the caller owns; it was not retried.
    #[error("conflict inside caller-owned transaction for org {org_id} ({kind}): {message}")]
    NestedTransactionConflict {
        org_id: OrgId,
        kind: ConflictKind,
        message: String,
    },

    #[error("unexpected failure refreshing org {org_id}{}: {message}", describe_target(.kind, .id))]
    Unexpected {
        org_id: OrgId,
        kind: Option<EntityKind>,
        id: Option<NaturalId>,
        message: String,
    },
}

impl RefreshError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether invoking the same refresh again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RefreshError::ConflictExhausted { .. } | RefreshError::NestedTransactionConflict { .. }
        )
    }
}

impl From<DomainError> for RefreshError {
    fn from(err: DomainError) -> Self {
        RefreshError::InvalidArgument(err.to_string())
    }
}

fn describe_target(kind: &Option<EntityKind>, id: &Option<NaturalId>) -> String {
    match (kind, id) {
        (Some(kind), Some(id)) => format!(" at {kind} {id}"),
        (Some(kind), None) => format!(" at {kind}"),
        (None, Some(id)) => format!(" at {id}"),
        (None, None) => String::new(),
    }
}
