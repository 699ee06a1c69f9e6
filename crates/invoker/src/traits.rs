//! The `ActionInvoker` trait, implemented by every outbound transport.

use async_trait::async_trait;

use crate::{ExecutionResult, InvocationRequest, TransportError};

/// Performs exactly one call for one [`InvocationRequest`].
///
/// Implementations must not retry: retry and timeout policy belong to the
/// dispatch queue that drives them.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Issue the request and return the remote status code and parsed body.
    async fn invoke(&self, request: &InvocationRequest) -> Result<ExecutionResult, TransportError>;
}
