// ABOUTME: JSON-RPC 2.0 over HTTP transport for invoking capability skills
// ABOUTME: Posts {method: skill, params: inputs} and unwraps the result or error member

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::error::{CapabilityError, Result};
use super::{CapabilityAddress, Transport};

pub const DEFAULT_EXECUTE_PATH: &str = "/execute";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a JsonValue,
    id: String,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    execute_path: String,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            execute_path: DEFAULT_EXECUTE_PATH.to_string(),
        }
    }

    /// Build a transport whose connections fail after `connect_timeout`.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            execute_path: DEFAULT_EXECUTE_PATH.to_string(),
        })
    }

    pub fn with_execute_path(mut self, path: impl Into<String>) -> Self {
        self.execute_path = path.into();
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(
        &self,
        address: &CapabilityAddress,
        capability_id: &str,
        payload: &JsonValue,
        timeout: Duration,
    ) -> Result<JsonValue> {
        let endpoint = address.endpoint(&self.execute_path)?;
        let request = RpcRequest {
            jsonrpc: "2.0",
            method: capability_id,
            params: payload,
            id: Uuid::new_v4().to_string(),
        };
        debug!("POST {} method={} id={}", endpoint, capability_id, request.id);

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout(timeout)
                } else {
                    CapabilityError::HttpError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: Map<String, JsonValue> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CapabilityError::Timeout(timeout)
            } else {
                CapabilityError::MalformedResponse {
                    capability_id: capability_id.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        parse_rpc_response(capability_id, envelope)
    }
}

/// Unwrap a JSON-RPC response envelope. An `error` member wins over `result`.
pub(crate) fn parse_rpc_response(capability_id: &str, mut envelope: Map<String, JsonValue>) -> Result<JsonValue> {
    if let Some(error) = envelope.remove("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(JsonValue::as_i64).unwrap_or(-32000);
        let message = match error.get("message").and_then(JsonValue::as_str) {
            Some(message) => message.to_string(),
            None => error.to_string(),
        };
        return Err(CapabilityError::Remote {
            capability_id: capability_id.to_string(),
            code,
            message,
        });
    }

    envelope
        .remove("result")
        .ok_or_else(|| CapabilityError::MalformedResponse {
            capability_id: capability_id.to_string(),
            reason: "response has neither 'result' nor 'error'".to_string(),
        })
}
