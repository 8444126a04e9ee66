//! Error types for the dispatch pipeline.

use thiserror::Error;

use crate::identity::{ExecutionId, HostId};
use crate::models::ExecutionStatus;

/// Storage failures and guard violations raised by a [`crate::ComputeRepository`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("host not found: {0}")]
    HostNotFound(HostId),
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),
    #[error("server already exists: {0}")]
    DuplicateServer(String),
    #[error("execution {execution_id} cannot move from {from} to {to}")]
    InvalidTransition {
        execution_id: ExecutionId,
        from: &'static str,
        to: &'static str,
    },
    #[error("execution {execution_id} already finalized as {status}")]
    AlreadyFinalized {
        execution_id: ExecutionId,
        status: &'static str,
    },
    #[error("execution already settled: {0}")]
    AlreadySettled(ExecutionId),
    #[error("total earnings overflow for host: {0}")]
    EarningsOverflow(HostId),
}

impl StoreError {
    pub(crate) fn invalid_transition(
        execution_id: &str,
        from: ExecutionStatus,
        to: ExecutionStatus,
    ) -> Self {
        StoreError::InvalidTransition {
            execution_id: execution_id.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

/// Hard failures of a dispatch. Expected outcomes (no eligible host, remote
/// failure) are reported through [`crate::DispatchOutcome`] instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid dispatch request: {0}")]
    InvalidRequest(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("double finalize attempt on execution {0}")]
    DoubleFinalizeAttempt(ExecutionId),
    #[error("double settlement attempt on execution {0}")]
    DoubleSettlementAttempt(ExecutionId),
    #[error("illegal execution transition: {0}")]
    InvalidTransition(String),
    #[error("host not found: {0}")]
    HostNotFound(HostId),
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyFinalized { execution_id, .. } => {
                DispatchError::DoubleFinalizeAttempt(execution_id)
            }
            StoreError::AlreadySettled(execution_id) => {
                DispatchError::DoubleSettlementAttempt(execution_id)
            }
            StoreError::InvalidTransition { .. } => DispatchError::InvalidTransition(err.to_string()),
            StoreError::HostNotFound(id) => DispatchError::HostNotFound(id),
            StoreError::ExecutionNotFound(id) => DispatchError::ExecutionNotFound(id),
            StoreError::DuplicateServer(_)
            | StoreError::EarningsOverflow(_)
            | StoreError::Backend(_) => DispatchError::Persistence(err.to_string()),
        }
    }
}

/// Registration-time validation failures for hosts and servers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid registration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
