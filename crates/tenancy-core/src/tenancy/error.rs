use serde::Serialize;

use super::domain::{EntityKind, TenancyId, UnitId};
use super::store::StoreError;

/// Classification used by callers to decide how to react to a failed workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Benign race; refresh and possibly retry against another target.
    PreconditionFailed,
    /// Safe to retry from the top.
    Transient,
    /// Data needs an operator; never dismissed automatically.
    ManualReconciliation,
    /// Rejected before any mutation.
    Validation,
}

/// Error raised by the lifecycle workflows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id} is {actual}, expected {expected}")]
    InvalidState {
        entity: EntityKind,
        id: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("unit {unit_id} is not available")]
    UnitUnavailable { unit_id: UnitId },
    #[error("tenancy {tenancy_id} requires manual reconciliation: {context}")]
    ManualReconciliationRequired {
        tenancy_id: TenancyId,
        context: String,
    },
    #[error("transient failure during {operation}, try again")]
    TransientFailure {
        operation: &'static str,
        retryable: bool,
    },
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidState { .. } | WorkflowError::UnitUnavailable { .. } => {
                ErrorKind::PreconditionFailed
            }
            WorkflowError::TransientFailure { .. } => ErrorKind::Transient,
            WorkflowError::ManualReconciliationRequired { .. } => {
                ErrorKind::ManualReconciliation
            }
            WorkflowError::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::TransientFailure {
                retryable: true,
                ..
            }
        )
    }

    pub(crate) fn invalid_state(
        entity: EntityKind,
        id: impl ToString,
        expected: &'static str,
        actual: &'static str,
    ) -> Self {
        WorkflowError::InvalidState {
            entity,
            id: id.to_string(),
            expected,
            actual,
        }
    }

    pub(crate) fn transient(operation: &'static str) -> Self {
        WorkflowError::TransientFailure {
            operation,
            retryable: true,
        }
    }

    pub(crate) fn missing(field: &'static str, entity: EntityKind, id: impl ToString) -> Self {
        WorkflowError::Validation {
            field,
            reason: format!("no {entity} with id {}", id.to_string()),
        }
    }

    pub(crate) fn reconciliation(tenancy_id: &TenancyId, context: impl Into<String>) -> Self {
        WorkflowError::ManualReconciliationRequired {
            tenancy_id: tenancy_id.clone(),
            context: context.into(),
        }
    }

    /// Map a store failure that survived the retry budget.
    pub(crate) fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => WorkflowError::Validation {
                field: "id",
                reason: format!("{operation}: record not found"),
            },
            StoreError::Conflict | StoreError::Unavailable(_) => Self::transient(operation),
        }
    }
}
