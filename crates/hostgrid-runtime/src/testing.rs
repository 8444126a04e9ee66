//! Shared fixtures for unit tests.

use chrono::Utc;
use serde_json::json;

use crate::credits::Credits;
use crate::models::{ExecutionRecord, ExecutionStatus, Host, HostStatus, ProtocolType};

pub(crate) fn sample_host(host_id: &str, profit_share_percentage: u8) -> Host {
    let now = Utc::now();
    Host {
        host_id: host_id.to_string(),
        owner_id: "operator-1".to_string(),
        name: format!("{} name", host_id),
        endpoint: "http://127.0.0.1:9".to_string(),
        status: HostStatus::Online,
        location: None,
        capabilities: vec!["cpu".to_string()],
        primary_protocol: ProtocolType::Mcp,
        compatible_protocols: vec![ProtocolType::Mcp],
        profit_share_percentage,
        total_executions: 0,
        successful_executions: 0,
        total_earnings: Credits::ZERO,
        created_at: now,
        updated_at: now,
        last_seen_at: None,
    }
}

pub(crate) fn sample_execution(execution_id: &str, host_id: &str, cost: Credits) -> ExecutionRecord {
    ExecutionRecord {
        execution_id: execution_id.to_string(),
        requester_id: "requester-1".to_string(),
        host_id: Some(host_id.to_string()),
        server_name: "X".to_string(),
        protocol_type: ProtocolType::Mcp,
        function_name: "run".to_string(),
        parameters: json!({"q": 1}),
        status: ExecutionStatus::Pending,
        cost,
        host_earnings: None,
        platform_earnings: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        settled_at: None,
        execution_time_ms: None,
        error_message: None,
        result: None,
    }
}
