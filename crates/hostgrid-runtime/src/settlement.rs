//! Settlement: turn a finalized execution into host statistics and payments.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::credits::{split_earnings, Credits, EarningsSplit};
use crate::error::DispatchError;
use crate::identity::new_id;
use crate::models::{
    ExecutionRecord, ExecutionStatus, Host, PaymentRecord, PaymentStatus, StatisticsDelta,
};
use crate::repository::ComputeRepository;

/// What one settlement changed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SettlementReceipt {
    pub execution_id: String,
    pub host_id: String,
    pub earnings: EarningsSplit,
    pub payment: Option<PaymentRecord>,
    /// Host state after the counters were applied.
    pub host: Host,
}

/// Earnings split for an execution that ended with `succeeded`.
///
/// Completed work pays the host its profit share (floored to a minor unit);
/// failed work credits nothing to the host and books the whole cost to the
/// platform.
pub fn earnings_for(host: &Host, cost: Credits, succeeded: bool) -> EarningsSplit {
    if succeeded {
        split_earnings(cost, host.profit_share_percentage)
    } else {
        EarningsSplit::platform_only(cost)
    }
}

#[derive(Clone)]
pub struct SettlementEngine<R: ComputeRepository> {
    repository: R,
}

impl<R: ComputeRepository> SettlementEngine<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Apply one finalized execution to its host.
    ///
    /// Status and earnings come from the stored row, not from `record`.
    /// Always counts the attempt. A completed execution also credits the host
    /// and emits exactly one pending payment. Each execution settles at most
    /// once; a repeat fails with [`DispatchError::DoubleSettlementAttempt`].
    pub fn settle(&self, record: &ExecutionRecord) -> Result<SettlementReceipt, DispatchError> {
        let record = self
            .repository
            .get_execution(&record.execution_id)?
            .ok_or_else(|| DispatchError::ExecutionNotFound(record.execution_id.clone()))?;
        let host_id = record.host_id.clone().ok_or_else(|| {
            DispatchError::InvalidRequest(format!(
                "execution {} has no host to settle against",
                record.execution_id
            ))
        })?;
        let earnings = record.earnings().ok_or_else(|| {
            DispatchError::InvalidRequest(format!(
                "execution {} has no recorded earnings",
                record.execution_id
            ))
        })?;
        let now = Utc::now();

        let (delta, payment) = match record.status {
            ExecutionStatus::Completed => {
                let payment = PaymentRecord {
                    payment_id: new_id(),
                    host_id: host_id.clone(),
                    execution_id: record.execution_id.clone(),
                    amount: earnings.host,
                    status: PaymentStatus::Pending,
                    created_at: now,
                    paid_at: None,
                };
                (StatisticsDelta::success(earnings.host), Some(payment))
            }
            ExecutionStatus::Failed => (StatisticsDelta::failure(), None),
            other => {
                return Err(DispatchError::InvalidTransition(format!(
                    "execution {} is {} and cannot be settled",
                    record.execution_id,
                    other.as_str()
                )))
            }
        };

        let host = self
            .repository
            .record_settlement(
                &record.execution_id,
                &host_id,
                &delta,
                payment.as_ref(),
                now,
            )?;
        info!(
            execution_id = %record.execution_id,
            host_id = %host_id,
            status = record.status.as_str(),
            host_earnings = %earnings.host,
            platform_earnings = %earnings.platform,
            "execution settled"
        );
        Ok(SettlementReceipt {
            execution_id: record.execution_id,
            host_id,
            earnings,
            payment,
            host,
        })
    }

    pub fn payments_for_host(&self, host_id: &str) -> Result<Vec<PaymentRecord>, DispatchError> {
        Ok(self.repository.list_payments_for_host(host_id)?)
    }

    pub fn payments_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<PaymentRecord>, DispatchError> {
        Ok(self.repository.list_payments_for_execution(execution_id)?)
    }
}
