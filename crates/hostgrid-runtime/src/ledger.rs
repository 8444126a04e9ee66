//! Execution ledger: the authoritative lifecycle record of one dispatch.
//!
//! `pending -> running -> {completed | failed}`. The repository performs each
//! transition as a conditional write, so a repeated finalize is rejected with
//! [`DispatchError::DoubleFinalizeAttempt`] and can never settle twice.

use chrono::Utc;
use tracing::debug;

use crate::error::DispatchError;
use crate::identity::new_id;
use crate::models::{ExecutionOutcome, ExecutionRecord, ExecutionStatus, NewExecution};
use crate::repository::{ComputeRepository, DEFAULT_EXECUTION_LIST_LIMIT};

#[derive(Clone)]
pub struct ExecutionLedger<R: ComputeRepository> {
    repository: R,
}

impl<R: ComputeRepository> ExecutionLedger<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Persist a new execution in `pending` state.
    pub fn create(&self, new_execution: NewExecution) -> Result<ExecutionRecord, DispatchError> {
        let record = ExecutionRecord {
            execution_id: new_id(),
            requester_id: new_execution.requester_id,
            host_id: Some(new_execution.host_id),
            server_name: new_execution.server_name,
            protocol_type: new_execution.protocol_type,
            function_name: new_execution.function_name,
            parameters: new_execution.parameters,
            status: ExecutionStatus::Pending,
            cost: new_execution.cost,
            host_earnings: None,
            platform_earnings: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            settled_at: None,
            execution_time_ms: None,
            error_message: None,
            result: None,
        };
        self.repository.insert_execution(&record)?;
        debug!(execution_id = %record.execution_id, "execution created");
        Ok(record)
    }

    /// `pending -> running`; must happen before the remote call starts.
    pub fn mark_running(&self, execution_id: &str) -> Result<ExecutionRecord, DispatchError> {
        Ok(self
            .repository
            .mark_execution_running(execution_id, Utc::now())?)
    }

    /// `running -> completed | failed`.
    pub fn finalize(
        &self,
        execution_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<ExecutionRecord, DispatchError> {
        let current = self.get(execution_id)?;
        let earnings = outcome.earnings();
        if earnings.total() != current.cost {
            return Err(DispatchError::InvalidRequest(format!(
                "earnings {} + {} do not add up to cost {} for execution {}",
                earnings.host, earnings.platform, current.cost, execution_id
            )));
        }
        Ok(self
            .repository
            .finalize_execution(execution_id, outcome, Utc::now())?)
    }

    pub fn get(&self, execution_id: &str) -> Result<ExecutionRecord, DispatchError> {
        self.repository
            .get_execution(execution_id)?
            .ok_or_else(|| DispatchError::ExecutionNotFound(execution_id.to_string()))
    }

    pub fn list_recent(
        &self,
        requester_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>, DispatchError> {
        let limit = limit.unwrap_or(DEFAULT_EXECUTION_LIST_LIMIT).max(1);
        Ok(self
            .repository
            .list_recent_executions(requester_id, limit)?)
    }
}
