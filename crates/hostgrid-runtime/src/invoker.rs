//! Remote invocation of a function on the selected host.
//!
//! One POST to `{endpoint}/execute` per dispatch, no retries. Every non-2xx
//! status, transport error, timeout or undecodable body is a failure; the
//! variants only differ in the error text recorded on the execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Host, ProtocolType};

/// Upper bound on how much of a failing host's response body is kept.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// JSON body sent to a host's execute endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub server: String,
    pub server_type: ProtocolType,
    pub function: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum InvocationError {
    #[error("Host returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Host request timed out: {0}")]
    Timeout(String),
    #[error("Host unreachable: {0}")]
    Transport(String),
    #[error("Host returned malformed response: {0}")]
    MalformedBody(String),
}

#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn invoke(&self, host: &Host, request: &InvocationRequest)
        -> Result<Value, InvocationError>;
}

#[async_trait]
impl<T: RemoteInvoker + ?Sized> RemoteInvoker for Arc<T> {
    async fn invoke(
        &self,
        host: &Host,
        request: &InvocationRequest,
    ) -> Result<Value, InvocationError> {
        (**self).invoke(host, request).await
    }
}

#[derive(Clone, Debug)]
pub struct InvokerConfig {
    /// Bound on the whole call, so a stalled host cannot hold a running execution.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl InvokerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// `reqwest`-backed invoker.
#[derive(Clone, Debug)]
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new() -> Result<Self, InvocationError> {
        Self::with_config(InvokerConfig::default())
    }

    pub fn with_config(config: InvokerConfig) -> Result<Self, InvocationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| InvocationError::Transport(format!("build http client: {}", e)))?;
        Ok(Self { client })
    }
}

pub(crate) fn endpoint_url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

fn classify_transport_error(err: reqwest::Error) -> InvocationError {
    if err.is_timeout() {
        InvocationError::Timeout(err.to_string())
    } else if err.is_decode() {
        InvocationError::MalformedBody(err.to_string())
    } else {
        InvocationError::Transport(err.to_string())
    }
}

fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body;
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[async_trait]
impl RemoteInvoker for HttpInvoker {
    async fn invoke(
        &self,
        host: &Host,
        request: &InvocationRequest,
    ) -> Result<Value, InvocationError> {
        let url = endpoint_url(&host.endpoint, "execute");
        debug!(host_id = %host.host_id, url = %url, function = %request.function, "invoking host");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(host_id = %host.host_id, status = %status, "host returned error status");
            return Err(InvocationError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        let bytes = response.bytes().await.map_err(classify_transport_error)?;
        serde_json::from_slice(&bytes).map_err(|e| InvocationError::MalformedBody(e.to_string()))
    }
}
