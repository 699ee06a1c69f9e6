//! Transport-level error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single outbound call.
///
/// Only the round trip is judged here: any HTTP status the remote service
/// answers with is a successful invocation. The variants are plain data so
/// queue bookkeeping can persist them next to the job they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportError {
    /// No response arrived within the request's timeout.
    #[error("request to {url} timed out after {after_ms} ms")]
    Timeout { url: String, after_ms: u64 },

    /// The connection could not be established.
    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    /// A response arrived but its body is not a JSON document.
    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },

    /// Any other failure while building or sending the request.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

impl TransportError {
    /// URL of the call that failed.
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::Connect { url, .. }
            | Self::Decode { url, .. }
            | Self::Request { url, .. } => url,
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error, timeout_ms: u64) -> Self {
        let url = url.to_owned();
        if err.is_timeout() {
            Self::Timeout { url, after_ms: timeout_ms }
        } else if err.is_connect() {
            Self::Connect { url, message: err.to_string() }
        } else if err.is_decode() {
            Self::Decode { url, message: err.to_string() }
        } else {
            Self::Request { url, message: err.to_string() }
        }
    }
}
