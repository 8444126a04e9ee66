//! Storage façade for hosts, executions, payments and server definitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    ExecutionOutcome, ExecutionRecord, Host, HostStatus, PaymentRecord, ServerDefinition,
    StatisticsDelta,
};

/// Default page size for execution listings.
pub const DEFAULT_EXECUTION_LIST_LIMIT: usize = 20;

/// Relational store contract used by the registry, ledger and settlement engine.
///
/// Implementations own every atomicity guarantee the dispatch path relies on:
/// - `apply_host_statistics` and `record_settlement` must increment counters in
///   place (never read-modify-write across calls), so concurrent settlements
///   against one host lose no updates.
/// - `mark_execution_running` and `finalize_execution` must check the current
///   status and write the new one in a single step; a finalize on a terminal
///   execution returns [`StoreError::AlreadyFinalized`].
/// - `record_settlement` marks the execution settled, applies statistics and
///   inserts the optional payment together. It only accepts a `completed` or
///   `failed` execution that has not been settled yet, so each execution is
///   counted exactly once; a repeat returns [`StoreError::AlreadySettled`].
/// - Earnings accumulation is overflow-checked; an overflowing delta returns
///   [`StoreError::EarningsOverflow`] and changes nothing.
pub trait ComputeRepository: Send + Sync {
    fn insert_host(&self, host: &Host) -> Result<(), StoreError>;

    fn get_host(&self, host_id: &str) -> Result<Option<Host>, StoreError>;

    /// All hosts, newest first.
    fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;

    fn list_hosts_by_status(&self, status: HostStatus) -> Result<Vec<Host>, StoreError>;

    fn update_host_status(
        &self,
        host_id: &str,
        status: HostStatus,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError>;

    fn update_profit_share(
        &self,
        host_id: &str,
        profit_share_percentage: u8,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError>;

    /// Atomically apply counter deltas and refresh `last_seen_at`.
    fn apply_host_statistics(
        &self,
        host_id: &str,
        delta: &StatisticsDelta,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError>;

    /// Mark the execution settled, apply statistics and insert the payment (if
    /// any) as one atomic unit.
    fn record_settlement(
        &self,
        execution_id: &str,
        host_id: &str,
        delta: &StatisticsDelta,
        payment: Option<&PaymentRecord>,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError>;

    fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError>;

    /// `pending -> running`, stamping `started_at`.
    fn mark_execution_running(
        &self,
        execution_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError>;

    /// `running -> completed | failed`, stamping `completed_at`.
    fn finalize_execution(
        &self,
        execution_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError>;

    /// Most recent executions first, optionally restricted to one requester.
    fn list_recent_executions(
        &self,
        requester_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    fn list_payments_for_host(&self, host_id: &str) -> Result<Vec<PaymentRecord>, StoreError>;

    fn list_payments_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<PaymentRecord>, StoreError>;

    /// Insert a server definition; `(owner_id, name)` must be unique.
    fn insert_server(&self, server: &ServerDefinition) -> Result<(), StoreError>;

    /// All server definitions, newest first.
    fn list_servers(&self) -> Result<Vec<ServerDefinition>, StoreError>;
}

impl<T: ComputeRepository + ?Sized> ComputeRepository for Arc<T> {
    fn insert_host(&self, host: &Host) -> Result<(), StoreError> {
        (**self).insert_host(host)
    }

    fn get_host(&self, host_id: &str) -> Result<Option<Host>, StoreError> {
        (**self).get_host(host_id)
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        (**self).list_hosts()
    }

    fn list_hosts_by_status(&self, status: HostStatus) -> Result<Vec<Host>, StoreError> {
        (**self).list_hosts_by_status(status)
    }

    fn update_host_status(
        &self,
        host_id: &str,
        status: HostStatus,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        (**self).update_host_status(host_id, status, now)
    }

    fn update_profit_share(
        &self,
        host_id: &str,
        profit_share_percentage: u8,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        (**self).update_profit_share(host_id, profit_share_percentage, now)
    }

    fn apply_host_statistics(
        &self,
        host_id: &str,
        delta: &StatisticsDelta,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        (**self).apply_host_statistics(host_id, delta, now)
    }

    fn record_settlement(
        &self,
        execution_id: &str,
        host_id: &str,
        delta: &StatisticsDelta,
        payment: Option<&PaymentRecord>,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        (**self).record_settlement(execution_id, host_id, delta, payment, now)
    }

    fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        (**self).insert_execution(record)
    }

    fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        (**self).get_execution(execution_id)
    }

    fn mark_execution_running(
        &self,
        execution_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError> {
        (**self).mark_execution_running(execution_id, started_at)
    }

    fn finalize_execution(
        &self,
        execution_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError> {
        (**self).finalize_execution(execution_id, outcome, completed_at)
    }

    fn list_recent_executions(
        &self,
        requester_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        (**self).list_recent_executions(requester_id, limit)
    }

    fn list_payments_for_host(&self, host_id: &str) -> Result<Vec<PaymentRecord>, StoreError> {
        (**self).list_payments_for_host(host_id)
    }

    fn list_payments_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        (**self).list_payments_for_execution(execution_id)
    }

    fn insert_server(&self, server: &ServerDefinition) -> Result<(), StoreError> {
        (**self).insert_server(server)
    }

    fn list_servers(&self) -> Result<Vec<ServerDefinition>, StoreError> {
        (**self).list_servers()
    }
}
