//! In-memory [`ComputeRepository`] used by tests and the `memory` storage backend.
//!
//! All tables live behind one mutex, so every trait method is a single critical
//! section and therefore atomic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::credits::Credits;
use crate::error::StoreError;
use crate::models::{
    ExecutionOutcome, ExecutionRecord, ExecutionStatus, Host, HostStatus, PaymentRecord,
    ServerDefinition, StatisticsDelta,
};
use crate::repository::ComputeRepository;

#[derive(Default)]
struct Tables {
    hosts: HashMap<String, Host>,
    executions: HashMap<String, ExecutionRecord>,
    /// Insertion order, used for newest-first listings.
    execution_order: Vec<String>,
    payments: Vec<PaymentRecord>,
    servers: Vec<ServerDefinition>,
}

#[derive(Clone, Default)]
pub struct InMemoryComputeRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryComputeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("in-memory compute repo lock poisoned".to_string()))
    }
}

fn checked_earnings(host: &Host, delta: &StatisticsDelta) -> Result<Credits, StoreError> {
    host.total_earnings
        .checked_add(delta.earnings_delta)
        .ok_or_else(|| StoreError::EarningsOverflow(host.host_id.clone()))
}

/// Counters only change once the earnings sum is known to fit.
fn apply_delta(
    host: &mut Host,
    delta: &StatisticsDelta,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let total_earnings = checked_earnings(host, delta)?;
    if delta.executed {
        host.total_executions += 1;
    }
    if delta.succeeded {
        host.successful_executions += 1;
    }
    host.total_earnings = total_earnings;
    host.last_seen_at = Some(now);
    host.updated_at = now;
    Ok(())
}

fn newest_first_hosts(mut hosts: Vec<Host>) -> Vec<Host> {
    hosts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.host_id.cmp(&b.host_id))
    });
    hosts
}

impl ComputeRepository for InMemoryComputeRepository {
    fn insert_host(&self, host: &Host) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.hosts.contains_key(&host.host_id) {
            return Err(StoreError::Backend(format!(
                "host already exists: {}",
                host.host_id
            )));
        }
        tables.hosts.insert(host.host_id.clone(), host.clone());
        Ok(())
    }

    fn get_host(&self, host_id: &str) -> Result<Option<Host>, StoreError> {
        Ok(self.lock()?.hosts.get(host_id).cloned())
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let hosts = self.lock()?.hosts.values().cloned().collect();
        Ok(newest_first_hosts(hosts))
    }

    fn list_hosts_by_status(&self, status: HostStatus) -> Result<Vec<Host>, StoreError> {
        let hosts = self
            .lock()?
            .hosts
            .values()
            .filter(|h| h.status == status)
            .cloned()
            .collect();
        Ok(newest_first_hosts(hosts))
    }

    fn update_host_status(
        &self,
        host_id: &str,
        status: HostStatus,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let mut tables = self.lock()?;
        let host = tables
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))?;
        host.status = status;
        host.updated_at = now;
        Ok(host.clone())
    }

    fn update_profit_share(
        &self,
        host_id: &str,
        profit_share_percentage: u8,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let mut tables = self.lock()?;
        let host = tables
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))?;
        host.profit_share_percentage = profit_share_percentage;
        host.updated_at = now;
        Ok(host.clone())
    }

    fn apply_host_statistics(
        &self,
        host_id: &str,
        delta: &StatisticsDelta,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let mut tables = self.lock()?;
        let host = tables
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))?;
        apply_delta(host, delta, now)?;
        Ok(host.clone())
    }

    fn record_settlement(
        &self,
        execution_id: &str,
        host_id: &str,
        delta: &StatisticsDelta,
        payment: Option<&PaymentRecord>,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let mut tables = self.lock()?;
        let record = tables
            .executions
            .get(execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
        if record.settled_at.is_some() {
            return Err(StoreError::AlreadySettled(execution_id.to_string()));
        }
        if !matches!(
            record.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
        ) {
            return Err(StoreError::InvalidTransition {
                execution_id: execution_id.to_string(),
                from: record.status.as_str(),
                to: "settled",
            });
        }
        let host = tables
            .hosts
            .get(host_id)
            .ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))?;
        checked_earnings(host, delta)?;
        if let Some(payment) = payment {
            if tables
                .payments
                .iter()
                .any(|p| p.execution_id == payment.execution_id)
            {
                return Err(StoreError::Backend(format!(
                    "payment already recorded for execution: {}",
                    payment.execution_id
                )));
            }
        }

        if let Some(record) = tables.executions.get_mut(execution_id) {
            record.settled_at = Some(now);
        }
        if let Some(payment) = payment {
            tables.payments.push(payment.clone());
        }
        let host = tables
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))?;
        apply_delta(host, delta, now)?;
        Ok(host.clone())
    }

    fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.executions.contains_key(&record.execution_id) {
            return Err(StoreError::Backend(format!(
                "execution already exists: {}",
                record.execution_id
            )));
        }
        tables
            .executions
            .insert(record.execution_id.clone(), record.clone());
        tables.execution_order.push(record.execution_id.clone());
        Ok(())
    }

    fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.lock()?.executions.get(execution_id).cloned())
    }

    fn mark_execution_running(
        &self,
        execution_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut tables = self.lock()?;
        let record = tables
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
        if record.status != ExecutionStatus::Pending {
            return Err(StoreError::invalid_transition(
                execution_id,
                record.status,
                ExecutionStatus::Running,
            ));
        }
        record.status = ExecutionStatus::Running;
        record.started_at = Some(started_at);
        Ok(record.clone())
    }

    fn finalize_execution(
        &self,
        execution_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut tables = self.lock()?;
        let record = tables
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
        if record.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized {
                execution_id: execution_id.to_string(),
                status: record.status.as_str(),
            });
        }
        if record.status != ExecutionStatus::Running {
            return Err(StoreError::invalid_transition(
                execution_id,
                record.status,
                outcome.status(),
            ));
        }
        let earnings = outcome.earnings();
        record.status = outcome.status();
        record.execution_time_ms = Some(outcome.execution_time_ms());
        record.host_earnings = Some(earnings.host);
        record.platform_earnings = Some(earnings.platform);
        record.completed_at = Some(completed_at);
        match outcome {
            ExecutionOutcome::Completed { result, .. } => {
                record.result = Some(result.clone());
                record.error_message = None;
            }
            ExecutionOutcome::Failed { error_message, .. } => {
                record.result = None;
                record.error_message = Some(error_message.clone());
            }
        }
        Ok(record.clone())
    }

    fn list_recent_executions(
        &self,
        requester_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .execution_order
            .iter()
            .rev()
            .filter_map(|id| tables.executions.get(id))
            .filter(|r| requester_id.map_or(true, |req| r.requester_id == req))
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_payments_for_host(&self, host_id: &str) -> Result<Vec<PaymentRecord>, StoreError> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .rev()
            .filter(|p| p.host_id == host_id)
            .cloned()
            .collect())
    }

    fn list_payments_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .filter(|p| p.execution_id == execution_id)
            .cloned()
            .collect())
    }

    fn insert_server(&self, server: &ServerDefinition) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables
            .servers
            .iter()
            .any(|s| s.owner_id == server.owner_id && s.name == server.name)
        {
            return Err(StoreError::DuplicateServer(server.name.clone()));
        }
        tables.servers.push(server.clone());
        Ok(())
    }

    fn list_servers(&self) -> Result<Vec<ServerDefinition>, StoreError> {
        Ok(self.lock()?.servers.iter().rev().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::credits::EarningsSplit;
    use crate::models::ProtocolType;
    use crate::testing::{sample_execution, sample_host};

    #[test]
    fn finalize_twice_is_rejected() {
        let repo = InMemoryComputeRepository::new();
        repo.insert_host(&sample_host("host-a", 70)).unwrap();
        let exec = sample_execution("exec-1", "host-a", Credits::from_whole(10));
        repo.insert_execution(&exec).unwrap();
        repo.mark_execution_running("exec-1", Utc::now()).unwrap();

        let outcome = ExecutionOutcome::Completed {
            result: json!({"result": "ok"}),
            execution_time_ms: 5,
            earnings: EarningsSplit {
                host: Credits::from_whole(7),
                platform: Credits::from_whole(3),
            },
        };
        repo.finalize_execution("exec-1", &outcome, Utc::now())
            .unwrap();
        let err = repo
            .finalize_execution("exec-1", &outcome, Utc::now())
            .expect_err("second finalize must fail");
        assert!(matches!(err, StoreError::AlreadyFinalized { .. }));
    }

    #[test]
    fn finalize_pending_execution_is_invalid_transition() {
        let repo = InMemoryComputeRepository::new();
        let exec = sample_execution("exec-2", "host-a", Credits::from_whole(1));
        repo.insert_execution(&exec).unwrap();
        let outcome = ExecutionOutcome::Failed {
            error_message: "boom".into(),
            execution_time_ms: 1,
            earnings: EarningsSplit::platform_only(Credits::from_whole(1)),
        };
        let err = repo
            .finalize_execution("exec-2", &outcome, Utc::now())
            .expect_err("pending cannot be finalized");
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn earnings_overflow_is_rejected_without_poisoning_the_store() {
        let repo = InMemoryComputeRepository::new();
        let mut host = sample_host("host-a", 70);
        host.total_earnings = Credits::from_minor_units(i64::MAX - 10);
        repo.insert_host(&host).unwrap();

        let delta = StatisticsDelta::success(Credits::from_minor_units(11));
        let err = repo
            .apply_host_statistics("host-a", &delta, Utc::now())
            .expect_err("sum exceeds i64");
        assert!(matches!(err, StoreError::EarningsOverflow(ref id) if id == "host-a"));

        let mut exec = sample_execution("exec-1", "host-a", Credits::from_whole(1));
        exec.status = ExecutionStatus::Completed;
        repo.insert_execution(&exec).unwrap();
        let err = repo
            .record_settlement("exec-1", "host-a", &delta, None, Utc::now())
            .expect_err("settlement overflow");
        assert!(matches!(err, StoreError::EarningsOverflow(_)));

        let after = repo.get_host("host-a").unwrap().expect("store still readable");
        assert_eq!(after.total_executions, 0);
        assert_eq!(after.total_earnings, host.total_earnings);
        assert!(repo.get_execution("exec-1").unwrap().unwrap().settled_at.is_none());
    }

    #[test]
    fn failed_execution_settles_only_once() {
        let repo = InMemoryComputeRepository::new();
        repo.insert_host(&sample_host("host-a", 70)).unwrap();
        let mut exec = sample_execution("exec-1", "host-a", Credits::from_whole(1));
        exec.status = ExecutionStatus::Failed;
        repo.insert_execution(&exec).unwrap();

        let delta = StatisticsDelta::failure();
        repo.record_settlement("exec-1", "host-a", &delta, None, Utc::now())
            .unwrap();
        let err = repo
            .record_settlement("exec-1", "host-a", &delta, None, Utc::now())
            .expect_err("second settlement");
        assert!(matches!(err, StoreError::AlreadySettled(ref id) if id == "exec-1"));
        assert_eq!(repo.get_host("host-a").unwrap().unwrap().total_executions, 1);
    }

    #[test]
    fn hosts_filter_by_status() {
        let repo = InMemoryComputeRepository::new();
        repo.insert_host(&sample_host("host-a", 70)).unwrap();
        let mut offline = sample_host("host-b", 70);
        offline.status = HostStatus::Offline;
        repo.insert_host(&offline).unwrap();

        let online = repo.list_hosts_by_status(HostStatus::Online).unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].host_id, "host-a");
        assert_eq!(online[0].primary_protocol, ProtocolType::Mcp);
    }

    #[test]
    fn recent_executions_are_newest_first_and_filtered() {
        let repo = InMemoryComputeRepository::new();
        for i in 0..3 {
            let mut exec =
                sample_execution(&format!("exec-{}", i), "host-a", Credits::from_whole(1));
            if i == 1 {
                exec.requester_id = "someone-else".into();
            }
            repo.insert_execution(&exec).unwrap();
        }
        let all = repo.list_recent_executions(None, 10).unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.execution_id.as_str()).collect();
        assert_eq!(ids, ["exec-2", "exec-1", "exec-0"]);

        let mine = repo.list_recent_executions(Some("requester-1"), 1).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].execution_id, "exec-2");
    }
}
