//! reqwest-backed [`ActionInvoker`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{ActionInvoker, ExecutionResult, HttpMethod, InvocationRequest, TransportError};

/// Sends invocations over a single pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpInvoker {
    /// Build an invoker with its own connection pool.
    pub fn new(default_timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(default_timeout)
            .build()?;
        Ok(Self::with_client(client, default_timeout))
    }

    pub fn with_client(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self { client, default_timeout }
    }
}

#[async_trait]
impl ActionInvoker for HttpInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ExecutionResult, TransportError> {
        let timeout = request.timeout_or(self.default_timeout);
        let timeout_ms = timeout.as_millis() as u64;

        debug!(
            node_id = %request.node_id,
            "{} {} (timeout {:?})",
            request.method, request.url, timeout
        );

        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .timeout(timeout);
        if request.method != HttpMethod::Get {
            builder = builder.json(&request.payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, e, timeout_ms))?;

        let status_code = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, e, timeout_ms))?;

        // An empty body is a valid "no content" answer.
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
                url: request.url.clone(),
                message: e.to_string(),
            })?
        };

        debug!(node_id = %request.node_id, "{} answered {}", request.url, status_code);

        Ok(ExecutionResult { status_code, body })
    }
}
