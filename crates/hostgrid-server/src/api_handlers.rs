//! Axum handlers for the dispatch server.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::middleware::{from_fn, Next};
use axum::routing::{get, post};
use axum::{Json, Router};
use hostgrid_runtime::{
    ComputeRepository, Credits, DispatchOutcome, DispatchRequest, DispatchSummary, Dispatcher,
    ExecutionRecord, Host, HostStatus, HostgridConfig, HttpInvoker, HttpProtocolDetector,
    InMemoryComputeRepository, ProtocolDetector, RemoteInvoker, ServerCatalog, ServerDefinition,
    StorageBackend,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api_errors::ApiError;
use crate::api_models::{
    ApiEnvelope, ApiMeta, DispatchExecutionRequest, ExecutionListResponse, HostListResponse,
    ListExecutionsQuery, ListHostsQuery, PaymentListResponse, RegisterHostRequest,
    RegisterServerRequest, ServerListResponse, UpdateHostStatusRequest, UpdateProfitShareRequest,
};

pub type SharedRepository = Arc<dyn ComputeRepository>;
pub type SharedInvoker = Arc<dyn RemoteInvoker>;
pub type SharedDetector = Arc<dyn ProtocolDetector>;

const REQUESTER_HEADER: &str = "x-requester-id";

#[derive(Clone)]
pub struct DispatchApiState {
    pub dispatcher: Dispatcher<SharedRepository, SharedInvoker>,
    pub catalog: ServerCatalog<SharedRepository, SharedDetector>,
    pub default_cost: Credits,
}

impl DispatchApiState {
    pub fn new(
        repository: SharedRepository,
        invoker: SharedInvoker,
        detector: SharedDetector,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(repository.clone(), invoker),
            catalog: ServerCatalog::new(repository, detector),
            default_cost: HostgridConfig::default().default_cost,
        }
    }

    pub fn with_default_cost(mut self, default_cost: Credits) -> Self {
        self.default_cost = default_cost;
        self
    }

    /// Wire the configured store with HTTP invocation and detection.
    pub fn from_config(config: &HostgridConfig) -> Result<Self, String> {
        let repository: SharedRepository = match config.backend {
            StorageBackend::Memory => Arc::new(InMemoryComputeRepository::new()),
            StorageBackend::Sqlite => open_sqlite(&config.sqlite_db_path)?,
        };
        let invoker = HttpInvoker::with_config(config.invoker_config())
            .map_err(|e| format!("failed to build host invoker: {}", e))?;
        let detector = HttpProtocolDetector::new(config.detect_timeout)
            .map_err(|e| format!("failed to build protocol detector: {}", e))?;
        Ok(Self::new(repository, Arc::new(invoker), Arc::new(detector))
            .with_default_cost(config.default_cost))
    }
}

#[cfg(feature = "sqlite-persistence")]
fn open_sqlite(db_path: &str) -> Result<SharedRepository, String> {
    let repo = hostgrid_runtime::SqliteComputeRepository::new(db_path)
        .map_err(|e| format!("failed to open sqlite store '{}': {}", db_path, e))?;
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "sqlite-persistence"))]
fn open_sqlite(_db_path: &str) -> Result<SharedRepository, String> {
    Err("HOSTGRID_STORAGE_BACKEND=sqlite requires feature 'sqlite-persistence'".to_string())
}

pub fn build_router(state: DispatchApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/executions", get(list_executions).post(dispatch_execution))
        .route("/v1/executions/:execution_id", get(get_execution))
        .route(
            "/v1/executions/:execution_id/payments",
            get(list_execution_payments),
        )
        .route("/v1/hosts", get(list_hosts).post(register_host))
        .route("/v1/hosts/:host_id", get(get_host))
        .route("/v1/hosts/:host_id/status", post(update_host_status))
        .route("/v1/hosts/:host_id/profit-share", post(update_profit_share))
        .route("/v1/hosts/:host_id/payments", get(list_host_payments))
        .route("/v1/servers", get(list_servers).post(register_server))
        .layer(from_fn(request_log_middleware))
        .with_state(state)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Caller identity, authenticated upstream and forwarded as a header.
fn requester_id(headers: &HeaderMap, rid: &str) -> Result<String, ApiError> {
    headers
        .get(REQUESTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::unauthorized(format!("{} header is required", REQUESTER_HEADER))
                .with_request_id(rid.to_string())
        })
}

fn envelope<T>(rid: String, data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope {
        meta: ApiMeta::ok(),
        request_id: rid,
        data,
    })
}

async fn request_log_middleware(
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let rid = request_id(&headers);
    info!(
        request_id = %rid,
        method = %request.method(),
        path = request.uri().path(),
        "dispatch_api_request"
    );
    next.run(request).await
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn dispatch_execution(
    State(state): State<DispatchApiState>,
    headers: HeaderMap,
    Json(req): Json<DispatchExecutionRequest>,
) -> Result<Json<ApiEnvelope<DispatchSummary>>, ApiError> {
    let rid = request_id(&headers);
    let requester = requester_id(&headers, &rid)?;
    let mut request = DispatchRequest::new(
        requester,
        req.server_name,
        req.function_name,
        req.cost_credits.unwrap_or(state.default_cost),
    )
    .with_parameters(req.parameters.unwrap_or_else(|| json!({})))
    .with_capabilities(req.required_capabilities);
    request.preferred_location = req.preferred_location;
    request.protocol_type = req.server_type;
    let requested_protocol = request.protocol_type;

    let outcome = state
        .dispatcher
        .dispatch(request)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    match outcome {
        DispatchOutcome::Executed(summary) => {
            info!(
                request_id = %rid,
                execution_id = %summary.execution_id,
                success = summary.success,
                "execution_dispatched"
            );
            Ok(envelope(rid, summary))
        }
        DispatchOutcome::NoHostAvailable => {
            warn!(request_id = %rid, "execution_rejected no available compute host");
            Err(ApiError::service_unavailable("No available compute hosts found")
                .with_request_id(rid)
                .with_details(json!({
                    "server_type": requested_protocol.map(|p| p.as_str()),
                })))
        }
    }
}

pub async fn list_executions(
    State(state): State<DispatchApiState>,
    headers: HeaderMap,
    Query(q): Query<ListExecutionsQuery>,
) -> Result<Json<ApiEnvelope<ExecutionListResponse>>, ApiError> {
    let rid = request_id(&headers);
    let limit = q.limit.map(|l| l.min(200));
    let executions = state
        .dispatcher
        .ledger()
        .list_recent(q.requester_id.as_deref(), limit)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, ExecutionListResponse { executions }))
}

pub async fn get_execution(
    State(state): State<DispatchApiState>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<ExecutionRecord>>, ApiError> {
    let rid = request_id(&headers);
    let record = state
        .dispatcher
        .ledger()
        .get(&execution_id)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, record))
}

pub async fn list_execution_payments(
    State(state): State<DispatchApiState>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<PaymentListResponse>>, ApiError> {
    let rid = request_id(&headers);
    let map_err = |e| ApiError::from(e).with_request_id(rid.clone());
    state.dispatcher.ledger().get(&execution_id).map_err(map_err)?;
    let payments = state
        .dispatcher
        .settlement()
        .payments_for_execution(&execution_id)
        .map_err(map_err)?;
    Ok(envelope(rid, PaymentListResponse { payments }))
}

pub async fn register_host(
    State(state): State<DispatchApiState>,
    headers: HeaderMap,
    Json(req): Json<RegisterHostRequest>,
) -> Result<Json<ApiEnvelope<Host>>, ApiError> {
    let rid = request_id(&headers);
    let owner = requester_id(&headers, &rid)?;
    let host = state
        .dispatcher
        .registry()
        .register_host(req.into_new_host(owner))
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, host))
}

pub async fn list_hosts(
    State(state): State<DispatchApiState>,
    headers: HeaderMap,
    Query(q): Query<ListHostsQuery>,
) -> Result<Json<ApiEnvelope<HostListResponse>>, ApiError> {
    let rid = request_id(&headers);
    let registry = state.dispatcher.registry();
    let hosts = match q.status.as_deref() {
        Some(raw) => {
            let status = HostStatus::from_str(raw)
                .map_err(|e| ApiError::bad_request(e).with_request_id(rid.clone()))?;
            registry.repository().list_hosts_by_status(status)
        }
        None => registry.list_hosts(),
    }
    .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, HostListResponse { hosts }))
}

pub async fn get_host(
    State(state): State<DispatchApiState>,
    Path(host_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<Host>>, ApiError> {
    let rid = request_id(&headers);
    let host = state
        .dispatcher
        .registry()
        .get_host(&host_id)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, host))
}

pub async fn update_host_status(
    State(state): State<DispatchApiState>,
    Path(host_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateHostStatusRequest>,
) -> Result<Json<ApiEnvelope<Host>>, ApiError> {
    let rid = request_id(&headers);
    let host = state
        .dispatcher
        .registry()
        .set_status(&host_id, req.status)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, host))
}

pub async fn update_profit_share(
    State(state): State<DispatchApiState>,
    Path(host_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateProfitShareRequest>,
) -> Result<Json<ApiEnvelope<Host>>, ApiError> {
    let rid = request_id(&headers);
    let host = state
        .dispatcher
        .registry()
        .set_profit_share(&host_id, req.profit_share_percentage)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, host))
}

pub async fn list_host_payments(
    State(state): State<DispatchApiState>,
    Path(host_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<PaymentListResponse>>, ApiError> {
    let rid = request_id(&headers);
    state
        .dispatcher
        .registry()
        .get_host(&host_id)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    let payments = state
        .dispatcher
        .settlement()
        .payments_for_host(&host_id)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, PaymentListResponse { payments }))
}

pub async fn register_server(
    State(state): State<DispatchApiState>,
    headers: HeaderMap,
    Json(req): Json<RegisterServerRequest>,
) -> Result<Json<ApiEnvelope<ServerDefinition>>, ApiError> {
    let rid = request_id(&headers);
    let owner = requester_id(&headers, &rid)?;
    let server = state
        .catalog
        .register_server(req.into_new_server(owner))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, server))
}

pub async fn list_servers(
    State(state): State<DispatchApiState>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<ServerListResponse>>, ApiError> {
    let rid = request_id(&headers);
    let requester = requester_id(&headers, &rid)?;
    let servers = state
        .catalog
        .list_visible(&requester)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, ServerListResponse { servers }))
}
