//! Dispatcher: the one externally invoked operation.
//!
//! select host -> create execution -> mark running -> invoke -> finalize ->
//! settle. No eligible host and a failed remote call are ordinary outcomes;
//! only store failures and guard violations surface as [`DispatchError`].
//!
//! Each store write is atomic on its own, the dispatch as a whole is not. If
//! the caller drops the future while the remote call is in flight, the
//! execution stays `running`; cancellation is not propagated to the host.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::catalog::resolve_visible_server;
use crate::credits::Credits;
use crate::error::DispatchError;
use crate::identity::{ExecutionId, HostId, RequesterId};
use crate::invoker::{InvocationRequest, RemoteInvoker};
use crate::ledger::ExecutionLedger;
use crate::models::{ExecutionOutcome, ExecutionStatus, NewExecution, ProtocolType};
use crate::registry::HostRegistry;
use crate::repository::ComputeRepository;
use crate::selector::{HostSelector, SelectionCriteria, SelectionDecision};
use crate::settlement::{earnings_for, SettlementEngine};

/// One dispatch as submitted by a requester. Cost is assumed to be
/// authorized upstream; the dispatcher never checks balances.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRequest {
    pub requester_id: RequesterId,
    pub server_name: String,
    pub function_name: String,
    pub parameters: Value,
    pub required_capabilities: Vec<String>,
    pub preferred_location: Option<String>,
    pub protocol_type: Option<ProtocolType>,
    pub cost: Credits,
}

impl DispatchRequest {
    pub fn new(
        requester_id: impl Into<String>,
        server_name: impl Into<String>,
        function_name: impl Into<String>,
        cost: Credits,
    ) -> Self {
        Self {
            requester_id: requester_id.into(),
            server_name: server_name.into(),
            function_name: function_name.into(),
            parameters: Value::Object(Default::default()),
            required_capabilities: Vec::new(),
            preferred_location: None,
            protocol_type: None,
            cost,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_protocol(mut self, protocol_type: ProtocolType) -> Self {
        self.protocol_type = Some(protocol_type);
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.preferred_location = Some(location.into());
        self
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if self.requester_id.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("requester_id is required".into()));
        }
        if self.server_name.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("server_name is required".into()));
        }
        if self.function_name.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("function_name is required".into()));
        }
        if self.cost.minor_units() < 0 {
            return Err(DispatchError::InvalidRequest(format!(
                "cost must not be negative, got {}",
                self.cost
            )));
        }
        if self.cost > Credits::MAX {
            return Err(DispatchError::InvalidRequest(format!(
                "cost must not exceed {}, got {}",
                Credits::MAX,
                self.cost
            )));
        }
        Ok(())
    }
}

/// Caller-facing summary of one executed dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub success: bool,
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub host_id: HostId,
    pub host_earnings: Credits,
    pub platform_earnings: Credits,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// An execution was created and ran to a terminal state.
    Executed(DispatchSummary),
    /// No online host matched; nothing was created.
    NoHostAvailable,
}

pub struct Dispatcher<R: ComputeRepository, I: RemoteInvoker> {
    registry: HostRegistry<R>,
    selector: HostSelector<R>,
    ledger: ExecutionLedger<R>,
    settlement: SettlementEngine<R>,
    invoker: Arc<I>,
    repository: R,
    resolve_server_protocol: bool,
}

impl<R: ComputeRepository + Clone, I: RemoteInvoker> Clone for Dispatcher<R, I> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            selector: self.selector.clone(),
            ledger: self.ledger.clone(),
            settlement: self.settlement.clone(),
            invoker: Arc::clone(&self.invoker),
            repository: self.repository.clone(),
            resolve_server_protocol: self.resolve_server_protocol,
        }
    }
}

impl<R: ComputeRepository + Clone, I: RemoteInvoker> Dispatcher<R, I> {
    pub fn new(repository: R, invoker: I) -> Self {
        let registry = HostRegistry::new(repository.clone());
        Self {
            selector: HostSelector::new(registry.clone()),
            registry,
            ledger: ExecutionLedger::new(repository.clone()),
            settlement: SettlementEngine::new(repository.clone()),
            invoker: Arc::new(invoker),
            repository,
            resolve_server_protocol: true,
        }
    }

    /// When enabled (the default), a request without a protocol inherits the
    /// protocol of the server definition it names.
    pub fn with_server_protocol_resolution(mut self, enabled: bool) -> Self {
        self.resolve_server_protocol = enabled;
        self
    }

    pub fn registry(&self) -> &HostRegistry<R> {
        &self.registry
    }

    pub fn ledger(&self) -> &ExecutionLedger<R> {
        &self.ledger
    }

    pub fn settlement(&self) -> &SettlementEngine<R> {
        &self.settlement
    }

    fn resolve_protocol(
        &self,
        request: &DispatchRequest,
    ) -> Result<Option<ProtocolType>, DispatchError> {
        if request.protocol_type.is_some() || !self.resolve_server_protocol {
            return Ok(request.protocol_type);
        }
        let servers = self.repository.list_servers()?;
        Ok(
            resolve_visible_server(servers, &request.requester_id, &request.server_name)
                .map(|server| server.protocol_type),
        )
    }

    #[instrument(
        skip(self, request),
        fields(requester_id = %request.requester_id, server = %request.server_name)
    )]
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        request.validate()?;
        let protocol_type = self.resolve_protocol(&request)?;

        let criteria = SelectionCriteria {
            required_capabilities: request.required_capabilities.clone(),
            protocol_type,
            preferred_location: request.preferred_location.clone(),
        };
        let host = match self.selector.select(&criteria)? {
            SelectionDecision::Selected(host) => host,
            SelectionDecision::NoHostAvailable => {
                warn!(protocol_type = ?protocol_type, "no available compute host");
                return Ok(DispatchOutcome::NoHostAvailable);
            }
        };
        info!(host_id = %host.host_id, "compute host selected");

        let protocol_type = protocol_type.unwrap_or(ProtocolType::Misc);
        let record = self.ledger.create(NewExecution {
            requester_id: request.requester_id.clone(),
            host_id: host.host_id.clone(),
            server_name: request.server_name.clone(),
            protocol_type,
            function_name: request.function_name.clone(),
            parameters: request.parameters.clone(),
            cost: request.cost,
        })?;
        let execution_id = record.execution_id.clone();
        self.ledger.mark_running(&execution_id)?;

        let invocation = InvocationRequest {
            server: request.server_name,
            server_type: protocol_type,
            function: request.function_name,
            parameters: request.parameters,
        };
        let started = Instant::now();
        let result = self.invoker.invoke(&host, &invocation).await;
        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match result {
            Ok(result) => ExecutionOutcome::Completed {
                result,
                execution_time_ms,
                earnings: earnings_for(&host, record.cost, true),
            },
            Err(e) => {
                warn!(
                    execution_id = %execution_id,
                    host_id = %host.host_id,
                    error = %e,
                    "remote invocation failed"
                );
                ExecutionOutcome::Failed {
                    error_message: e.to_string(),
                    execution_time_ms,
                    earnings: earnings_for(&host, record.cost, false),
                }
            }
        };

        let finalized = self.ledger.finalize(&execution_id, &outcome)?;
        let receipt = self.settlement.settle(&finalized)?;

        info!(
            execution_id = %execution_id,
            host_id = %host.host_id,
            status = finalized.status.as_str(),
            execution_time_ms,
            "dispatch finished"
        );
        Ok(DispatchOutcome::Executed(DispatchSummary {
            success: finalized.status == ExecutionStatus::Completed,
            execution_id,
            status: finalized.status,
            result: finalized.result,
            error: finalized.error_message,
            execution_time_ms,
            host_id: host.host_id,
            host_earnings: receipt.earnings.host,
            platform_earnings: receipt.earnings.platform,
        }))
    }
}
