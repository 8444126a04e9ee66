//! HTTP surface for hostgrid compute dispatch.

pub mod api_errors;
pub mod api_handlers;
pub mod api_models;

pub use api_errors::ApiError;
pub use api_handlers::{
    build_router, DispatchApiState, SharedDetector, SharedInvoker, SharedRepository,
};
pub use api_models::{
    ApiEnvelope, ApiMeta, DispatchExecutionRequest, ExecutionListResponse, HostListResponse,
    ListExecutionsQuery, ListHostsQuery, PaymentListResponse, RegisterHostRequest,
    RegisterServerRequest, ServerListResponse, UpdateHostStatusRequest, UpdateProfitShareRequest,
};
