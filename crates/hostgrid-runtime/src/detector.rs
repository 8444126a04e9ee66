//! Protocol detection for server definitions.
//!
//! Fetches `GET {endpoint}/info` and classifies the JSON it returns. Detection
//! runs when a server is registered, never during host selection, and any
//! failure degrades to [`ProtocolType::Misc`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::invoker::endpoint_url;
use crate::models::ProtocolType;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("info request failed: {0}")]
    Request(String),
    #[error("info endpoint returned {0}")]
    Status(u16),
    #[error("info body is not json: {0}")]
    Body(String),
}

#[async_trait]
pub trait ProtocolDetector: Send + Sync {
    async fn detect(&self, endpoint: &str) -> Result<ProtocolType, DetectError>;

    /// Detect, falling back to `Misc` on any error.
    async fn detect_or_misc(&self, endpoint: &str) -> ProtocolType {
        match self.detect(endpoint).await {
            Ok(protocol) => protocol,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "protocol detection failed, using misc");
                ProtocolType::Misc
            }
        }
    }
}

#[async_trait]
impl<T: ProtocolDetector + ?Sized> ProtocolDetector for Arc<T> {
    async fn detect(&self, endpoint: &str) -> Result<ProtocolType, DetectError> {
        (**self).detect(endpoint).await
    }
}

/// Classify an `/info` document.
pub fn classify_info(info: &Value) -> ProtocolType {
    let has = |key: &str| info.get(key).map_or(false, |v| !v.is_null());
    let declares = |wanted: &str| {
        ["protocol", "type"]
            .iter()
            .any(|key| info.get(*key).and_then(Value::as_str) == Some(wanted))
    };
    if declares("mcp") || has("mcpVersion") || has("protocolVersion") {
        return ProtocolType::Mcp;
    }
    if declares("a2a") || has("agentCapabilities") || has("agentType") || has("a2aVersion") {
        return ProtocolType::A2a;
    }
    ProtocolType::Misc
}

#[derive(Clone, Debug)]
pub struct HttpProtocolDetector {
    client: reqwest::Client,
}

impl HttpProtocolDetector {
    pub fn new(timeout: Duration) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectError::Request(format!("build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProtocolDetector for HttpProtocolDetector {
    async fn detect(&self, endpoint: &str) -> Result<ProtocolType, DetectError> {
        let response = self
            .client
            .get(endpoint_url(endpoint, "info"))
            .send()
            .await
            .map_err(|e| DetectError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DetectError::Status(response.status().as_u16()));
        }
        let info: Value = response
            .json()
            .await
            .map_err(|e| DetectError::Body(e.to_string()))?;
        Ok(classify_info(&info))
    }
}

/// Detector that always answers with a fixed protocol.
#[derive(Clone, Copy, Debug)]
pub struct StaticProtocolDetector(pub ProtocolType);

#[async_trait]
impl ProtocolDetector for StaticProtocolDetector {
    async fn detect(&self, _endpoint: &str) -> Result<ProtocolType, DetectError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn mcp_markers() {
        assert_eq!(classify_info(&json!({"protocol": "mcp"})), ProtocolType::Mcp);
        assert_eq!(classify_info(&json!({"type": "mcp"})), ProtocolType::Mcp);
        assert_eq!(classify_info(&json!({"mcpVersion": "1.0"})), ProtocolType::Mcp);
        assert_eq!(
            classify_info(&json!({"protocolVersion": "2024-11-05"})),
            ProtocolType::Mcp
        );
    }

    #[test]
    fn a2a_markers() {
        assert_eq!(classify_info(&json!({"protocol": "a2a"})), ProtocolType::A2a);
        assert_eq!(classify_info(&json!({"type": "a2a"})), ProtocolType::A2a);
        assert_eq!(
            classify_info(&json!({"agentCapabilities": ["chat"]})),
            ProtocolType::A2a
        );
        assert_eq!(classify_info(&json!({"agentType": "planner"})), ProtocolType::A2a);
        assert_eq!(classify_info(&json!({"a2aVersion": 1})), ProtocolType::A2a);
    }

    #[test]
    fn anything_else_is_misc() {
        assert_eq!(classify_info(&json!({"protocol": "grpc"})), ProtocolType::Misc);
        assert_eq!(classify_info(&json!({"type": "service"})), ProtocolType::Misc);
        assert_eq!(classify_info(&json!({"mcpVersion": null})), ProtocolType::Misc);
        assert_eq!(classify_info(&json!([1, 2, 3])), ProtocolType::Misc);
    }

    #[tokio::test]
    async fn unreachable_endpoint_falls_back_to_misc() {
        let detector = HttpProtocolDetector::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) is not listening on loopback in test environments.
        let protocol = detector.detect_or_misc("http://127.0.0.1:9").await;
        assert_eq!(protocol, ProtocolType::Misc);
    }
}
