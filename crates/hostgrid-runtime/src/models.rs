//! Domain records for hosts, server definitions, executions and payments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credits::{Credits, EarningsSplit};
use crate::identity::{ExecutionId, HostId, PaymentId, RequesterId, ServerId};

/// Calling convention a server or host speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Mcp,
    A2a,
    Misc,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::Mcp => "mcp",
            ProtocolType::A2a => "a2a",
            ProtocolType::Misc => "misc",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mcp" => Ok(ProtocolType::Mcp),
            "a2a" => Ok(ProtocolType::A2a),
            "misc" => Ok(ProtocolType::Misc),
            other => Err(format!(
                "invalid protocol type '{}'. expected one of: mcp, a2a, misc",
                other
            )),
        }
    }
}

/// Operational status of a host. Only `Online` hosts are selectable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
    Busy,
    Maintenance,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
            HostStatus::Busy => "busy",
            HostStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(HostStatus::Online),
            "offline" => Ok(HostStatus::Offline),
            "busy" => Ok(HostStatus::Busy),
            "maintenance" => Ok(HostStatus::Maintenance),
            other => Err(format!(
                "invalid host status '{}'. expected one of: online, offline, busy, maintenance",
                other
            )),
        }
    }
}

/// A registered compute provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub host_id: HostId,
    pub owner_id: String,
    pub name: String,
    pub endpoint: String,
    pub status: HostStatus,
    pub location: Option<String>,
    /// Capability tags matched against `required_capabilities` at selection time.
    pub capabilities: Vec<String>,
    pub primary_protocol: ProtocolType,
    pub compatible_protocols: Vec<ProtocolType>,
    /// Host's cut of each charge, `0..=100`.
    pub profit_share_percentage: u8,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub total_earnings: Credits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Host {
    /// True when the host can speak `protocol`, either through its compatible set
    /// or its declared primary type.
    pub fn speaks(&self, protocol: ProtocolType) -> bool {
        self.primary_protocol == protocol || self.compatible_protocols.contains(&protocol)
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.total_executions == 0 {
            return None;
        }
        Some(self.successful_executions as f64 / self.total_executions as f64)
    }
}

/// Operator input for registering a host.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewHost {
    pub owner_id: String,
    pub name: String,
    pub endpoint: String,
    pub location: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub primary_protocol: Option<ProtocolType>,
    #[serde(default)]
    pub compatible_protocols: Vec<ProtocolType>,
    pub profit_share_percentage: Option<u8>,
}

/// Counter changes applied to a host after one execution settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatisticsDelta {
    pub executed: bool,
    pub succeeded: bool,
    pub earnings_delta: Credits,
}

impl StatisticsDelta {
    pub fn success(earnings: Credits) -> Self {
        Self {
            executed: true,
            succeeded: true,
            earnings_delta: earnings,
        }
    }

    pub fn failure() -> Self {
        Self {
            executed: true,
            succeeded: false,
            earnings_delta: Credits::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerVisibility {
    Public,
    Private,
}

/// A named logical capability addressed by requesters. Resolved to a host by
/// protocol match at dispatch time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub server_id: ServerId,
    pub owner_id: String,
    pub name: String,
    pub protocol_type: ProtocolType,
    pub endpoint: String,
    pub visibility: ServerVisibility,
    pub description: Option<String>,
    /// Opaque payload; never executed by the dispatcher.
    pub code: Option<String>,
    pub app_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ServerDefinition {
    pub fn visible_to(&self, requester_id: &str) -> bool {
        self.visibility == ServerVisibility::Public || self.owner_id == requester_id
    }
}

/// Lifecycle status of one execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Reserved; no dispatch path produces it.
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status '{}'", other)),
        }
    }
}

/// Durable record of one dispatch attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub requester_id: RequesterId,
    pub host_id: Option<HostId>,
    pub server_name: String,
    pub protocol_type: ProtocolType,
    pub function_name: String,
    pub parameters: Value,
    pub status: ExecutionStatus,
    pub cost: Credits,
    pub host_earnings: Option<Credits>,
    pub platform_earnings: Option<Credits>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once, when the terminal execution is applied to host statistics.
    pub settled_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub result: Option<Value>,
}

impl ExecutionRecord {
    pub fn earnings(&self) -> Option<EarningsSplit> {
        match (self.host_earnings, self.platform_earnings) {
            (Some(host), Some(platform)) => Some(EarningsSplit { host, platform }),
            _ => None,
        }
    }
}

/// Input for creating an execution in `pending` state.
#[derive(Clone, Debug)]
pub struct NewExecution {
    pub requester_id: RequesterId,
    pub host_id: HostId,
    pub server_name: String,
    pub protocol_type: ProtocolType,
    pub function_name: String,
    pub parameters: Value,
    pub cost: Credits,
}

/// Terminal outcome handed to the ledger when an execution finishes.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutcome {
    Completed {
        result: Value,
        execution_time_ms: u64,
        earnings: EarningsSplit,
    },
    Failed {
        error_message: String,
        execution_time_ms: u64,
        earnings: EarningsSplit,
    },
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Completed { .. } => ExecutionStatus::Completed,
            ExecutionOutcome::Failed { .. } => ExecutionStatus::Failed,
        }
    }

    pub fn earnings(&self) -> EarningsSplit {
        match self {
            ExecutionOutcome::Completed { earnings, .. }
            | ExecutionOutcome::Failed { earnings, .. } => *earnings,
        }
    }

    pub fn execution_time_ms(&self) -> u64 {
        match self {
            ExecutionOutcome::Completed {
                execution_time_ms, ..
            }
            | ExecutionOutcome::Failed {
                execution_time_ms, ..
            } => *execution_time_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }
}

/// Amount owed to a host for one completed execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub host_id: HostId,
    pub execution_id: ExecutionId,
    pub amount: Credits,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}
