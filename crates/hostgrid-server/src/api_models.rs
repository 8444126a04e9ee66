//! API DTOs for the dispatch server.

use hostgrid_runtime::{
    Credits, ExecutionRecord, Host, HostStatus, NewHost, NewServer, PaymentRecord, ProtocolType,
    ServerDefinition, ServerVisibility,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub meta: ApiMeta,
    pub request_id: String,
    pub data: T,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiMeta {
    pub status: &'static str,
    pub api_version: &'static str,
}

impl ApiMeta {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            api_version: "v1",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DispatchExecutionRequest {
    pub server_name: String,
    pub function_name: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    pub preferred_location: Option<String>,
    pub server_type: Option<ProtocolType>,
    pub cost_credits: Option<Credits>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub requester_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecutionListResponse {
    pub executions: Vec<ExecutionRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentListResponse {
    pub payments: Vec<PaymentRecord>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterHostRequest {
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

impl RegisterHostRequest {
    pub fn into_new_host(self, owner_id: String) -> NewHost {
        NewHost {
            owner_id,
            name: self.name,
            endpoint: self.endpoint,
            location: self.location,
            capabilities: self.capabilities,
            primary_protocol: self.primary_protocol,
            compatible_protocols: self.compatible_protocols,
            profit_share_percentage: self.profit_share_percentage,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListHostsQuery {
    pub status: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HostListResponse {
    pub hosts: Vec<Host>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpdateHostStatusRequest {
    pub status: HostStatus,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpdateProfitShareRequest {
    pub profit_share_percentage: u8,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterServerRequest {
    pub name: String,
    pub endpoint: String,
    pub protocol_type: Option<ProtocolType>,
    pub visibility: Option<ServerVisibility>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub app_url: Option<String>,
}

impl RegisterServerRequest {
    pub fn into_new_server(self, owner_id: String) -> NewServer {
        NewServer {
            owner_id,
            name: self.name,
            endpoint: self.endpoint,
            protocol_type: self.protocol_type,
            visibility: self.visibility,
            description: self.description,
            code: self.code,
            app_url: self.app_url,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerListResponse {
    pub servers: Vec<ServerDefinition>,
}
