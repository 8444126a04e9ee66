//! HTTP error mapping for dispatch API handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hostgrid_runtime::{DispatchError, RegistryError, StoreError};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(ErrorState),
    Unauthorized(ErrorState),
    NotFound(ErrorState),
    Conflict(ErrorState),
    ServiceUnavailable(ErrorState),
    Internal(ErrorState),
}

#[derive(Clone, Debug)]
pub struct ErrorState {
    pub message: String,
    pub request_id: Option<String>,
    pub details: Option<Value>,
}

impl ErrorState {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            request_id: None,
            details: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct ErrorEnvelope {
    request_id: String,
    error: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(ErrorState::new(message))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(ErrorState::new(message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(ErrorState::new(message))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(ErrorState::new(message))
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(ErrorState::new(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(ErrorState::new(message))
    }

    fn state_mut(&mut self) -> &mut ErrorState {
        match self {
            Self::BadRequest(s)
            | Self::Unauthorized(s)
            | Self::NotFound(s)
            | Self::Conflict(s)
            | Self::ServiceUnavailable(s)
            | Self::Internal(s) => s,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.state_mut().request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.state_mut().details = Some(details);
        self
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::HostNotFound(_) | StoreError::ExecutionNotFound(_) => {
                ApiError::not_found(err.to_string())
            }
            StoreError::DuplicateServer(_)
            | StoreError::InvalidTransition { .. }
            | StoreError::AlreadyFinalized { .. }
            | StoreError::AlreadySettled(_) => ApiError::conflict(err.to_string()),
            StoreError::EarningsOverflow(_) | StoreError::Backend(_) => {
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Invalid(message) => ApiError::bad_request(message),
            RegistryError::Store(e) => e.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidRequest(message) => ApiError::bad_request(message),
            DispatchError::HostNotFound(_) | DispatchError::ExecutionNotFound(_) => {
                ApiError::not_found(err.to_string())
            }
            DispatchError::Persistence(_)
            | DispatchError::DoubleFinalizeAttempt(_)
            | DispatchError::DoubleSettlementAttempt(_)
            | DispatchError::InvalidTransition(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, state) = match self {
            Self::BadRequest(s) => (StatusCode::BAD_REQUEST, "invalid_argument", s),
            Self::Unauthorized(s) => (StatusCode::UNAUTHORIZED, "unauthorized", s),
            Self::NotFound(s) => (StatusCode::NOT_FOUND, "not_found", s),
            Self::Conflict(s) => (StatusCode::CONFLICT, "conflict", s),
            Self::ServiceUnavailable(s) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", s)
            }
            Self::Internal(s) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", s),
        };
        let request_id = state
            .request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let body = ErrorEnvelope {
            request_id,
            error: ErrorBody {
                code,
                message: state.message,
                details: state.details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn store_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(StoreError::HostNotFound("h".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StoreError::DuplicateServer("s".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StoreError::AlreadySettled("e".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StoreError::EarningsOverflow("h".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(StoreError::Backend("disk".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn dispatch_guard_violations_are_internal() {
        assert_eq!(
            status_of(DispatchError::DoubleFinalizeAttempt("e".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(DispatchError::DoubleSettlementAttempt("e".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(DispatchError::InvalidRequest("bad".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RegistryError::Invalid("share".into()).into()),
            StatusCode::BAD_REQUEST
        );
    }
}
