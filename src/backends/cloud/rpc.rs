// ============================================================================
// File: packages/gridplane/src/backends/cloud/rpc.rs
// ----------------------------------------------------------------------------
// RPC transport to the cloud provider.
// ============================================================================

use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::debug;
use serde_json::Value;
use tokio::time::timeout;

use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::backends::{BackendError, BackendResult};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Calls a method on the cloud provider's RPC endpoint
pub trait RpcTransport: Send + Sync + std::fmt::Debug {
    /// Invoke `method` with positional `params`; resolves to the raw result
    fn call(&self, endpoint: &str, method: &str, params: Vec<Value>)
    -> AsyncTask<BackendResult<Value>>;
}

/// JSON-RPC 2.0 over plain HTTP
#[derive(Debug, Clone)]
pub struct HttpRpcTransport {
    http_client: HttpClient,
    request_timeout: Duration,
}

impl Default for HttpRpcTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HttpRpcTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            http_client: Client::builder(TokioExecutor::new()).build_http(),
            request_timeout,
        }
    }
}

impl RpcTransport for HttpRpcTransport {
    fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Vec<Value>,
    ) -> AsyncTask<BackendResult<Value>> {
        let client = self.http_client.clone();
        let request_timeout = self.request_timeout;
        let endpoint = endpoint.to_string();
        let method = method.to_string();

        AsyncTaskBuilder::new(async move {
            let rpc_error = |details: String| BackendError::Rpc {
                method: method.clone(),
                details,
            };

            let envelope = serde_json::json!({
                "jsonrpc": "2.0",
                "id": uuid::Uuid::new_v4().to_string(),
                "method": &method,
                "params": &params,
            });
            let body = serde_json::to_vec(&envelope)
                .map_err(|e| rpc_error(format!("Failed to serialize request: {e}")))?;

            let request = Request::builder()
                .method(Method::POST)
                .uri(endpoint.as_str())
                .header(CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(body)))
                .map_err(|e| rpc_error(format!("Failed to create HTTP request: {e}")))?;

            debug!("RPC {method} -> {endpoint}");
            let response = timeout(request_timeout, client.request(request))
                .await
                .map_err(|_| rpc_error(format!("No response within {request_timeout:?}")))?
                .map_err(|e| rpc_error(format!("Request failed: {e}")))?;

            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| rpc_error(format!("Failed to read response: {e}")))?
                .to_bytes();
            if !status.is_success() {
                return Err(rpc_error(format!("HTTP status {status}")));
            }

            let reply: Value = serde_json::from_slice(&bytes)
                .map_err(|e| rpc_error(format!("Malformed response: {e}")))?;
            match reply.get("error") {
                Some(error) if !error.is_null() => Err(rpc_error(error.to_string())),
                _ => reply
                    .get("result")
                    .cloned()
                    .ok_or_else(|| rpc_error("Response carries no result".to_string())),
            }
        })
        .spawn()
    }
}

/// Unwrap the provider's `[success, value, ...]` result shape
///
/// On failure the second element is the provider's error message.
pub fn provider_result(method: &str, result: Value) -> BackendResult<Value> {
    let failure = |details: String| BackendError::Rpc {
        method: method.to_string(),
        details,
    };

    let mut items = match result {
        Value::Array(items) => items,
        other => return Err(failure(format!("Unexpected result shape: {other}"))),
    };
    if items.len() < 2 {
        return Err(failure("Result has fewer than two elements".to_string()));
    }
    let value = items.swap_remove(1);
    match items.first().and_then(Value::as_bool) {
        Some(true) => Ok(value),
        Some(false) => Err(failure(match value {
            Value::String(message) => message,
            other => other.to_string(),
        })),
        None => Err(failure("Result lacks a success flag".to_string())),
    }
}
