//! Request and result types exchanged between the engine, the queue and
//! the invoker.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// HttpMethod
// ---------------------------------------------------------------------------

/// HTTP verb used for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Patch => write!(f, "PATCH"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET"    => Ok(Self::Get),
            "POST"   => Ok(Self::Post),
            "PUT"    => Ok(Self::Put),
            "PATCH"  => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other    => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

// ---------------------------------------------------------------------------
// InvocationRequest
// ---------------------------------------------------------------------------

/// One outbound call, derived from a workflow node.
///
/// `node_id` is carried only so the queue can correlate results back to the
/// node; the invoker never looks at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub node_id: String,
    pub method: HttpMethod,
    pub url: String,
    /// Sent verbatim as the JSON request body.
    pub payload: Value,
    /// Per-call timeout in milliseconds. `None` falls back to the worker default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl InvocationRequest {
    /// A `POST` request with no explicit timeout.
    pub fn post(node_id: impl Into<String>, url: impl Into<String>, payload: Value) -> Self {
        Self {
            node_id: node_id.into(),
            method: HttpMethod::Post,
            url: url.into(),
            payload,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// The request's own timeout, or `default` when none was set.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of a completed round trip: the remote status code and the parsed
/// body, both passed through uninterpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status_code: u16,
    pub body: Value,
}

impl ExecutionResult {
    pub fn new(status_code: u16, body: Value) -> Self {
        Self { status_code, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("Delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn request_timeout_falls_back_to_default() {
        let req = InvocationRequest::post("n1", "http://svc/save-file", json!({}));
        assert_eq!(req.timeout_or(Duration::from_secs(3)), Duration::from_secs(3));

        let req = req.with_timeout(Duration::from_millis(250));
        assert_eq!(req.timeout_ms, Some(250));
        assert_eq!(req.timeout_or(Duration::from_secs(3)), Duration::from_millis(250));
    }

    #[test]
    fn method_serializes_uppercase() {
        let req = InvocationRequest::post("n1", "http://svc/a", json!({ "k": 1 }));
        let doc = serde_json::to_value(&req).unwrap();
        assert_eq!(doc["method"], "POST");
        assert!(doc.get("timeout_ms").is_none());
    }
}
