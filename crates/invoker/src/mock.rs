//! `MockInvoker`, a test double for `ActionInvoker`.
//!
//! Useful in queue and engine tests where a real remote service is either
//! unavailable or irrelevant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ActionInvoker, ExecutionResult, InvocationRequest, TransportError};

/// Behaviour injected into `MockInvoker` for a URL (or as the default).
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Echo the node id and payload back with a 200.
    Echo,
    /// Answer with a fixed status and body.
    Respond { status: u16, body: Value },
    /// Always fail with the given transport error.
    Fail(TransportError),
    /// Sleep, then answer with a 200 echo.
    Delay(Duration),
    /// Fail with a connect error for the first `failures` calls, then echo.
    Flaky { failures: usize },
}

/// A mock invoker that records every call it receives and returns a
/// programmer-specified result per URL.
#[derive(Debug, Clone)]
pub struct MockInvoker {
    default: MockBehaviour,
    routes: HashMap<String, MockBehaviour>,
    /// All requests seen (in call order).
    calls: Arc<Mutex<Vec<InvocationRequest>>>,
    /// `start:<node>` / `end:<node>` entries, in the order they happened.
    journal: Arc<Mutex<Vec<String>>>,
}

impl Default for MockInvoker {
    fn default() -> Self {
        Self::echo()
    }
}

impl MockInvoker {
    /// A mock that answers every call with a 200 echo.
    pub fn echo() -> Self {
        Self::with_default(MockBehaviour::Echo)
    }

    pub fn with_default(default: MockBehaviour) -> Self {
        Self {
            default,
            routes: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Override the behaviour for one exact URL.
    pub fn route(mut self, url: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.routes.insert(url.into(), behaviour);
        self
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn calls(&self) -> Vec<InvocationRequest> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls received for one URL.
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).iter().filter(|r| r.url == url).count()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn note(&self, entry: String) {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    fn echo_result(request: &InvocationRequest) -> ExecutionResult {
        ExecutionResult::new(
            200,
            json!({ "node_id": request.node_id, "payload": request.payload }),
        )
    }
}

#[async_trait]
impl ActionInvoker for MockInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ExecutionResult, TransportError> {
        let previous_calls = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = calls.iter().filter(|r| r.url == request.url).count();
            calls.push(request.clone());
            previous
        };
        self.note(format!("start:{}", request.node_id));

        let behaviour = self.routes.get(&request.url).unwrap_or(&self.default);
        let outcome = match behaviour {
            MockBehaviour::Echo => Ok(Self::echo_result(request)),
            MockBehaviour::Respond { status, body } => Ok(ExecutionResult::new(*status, body.clone())),
            MockBehaviour::Fail(err) => Err(err.clone()),
            MockBehaviour::Delay(after) => {
                tokio::time::sleep(*after).await;
                Ok(Self::echo_result(request))
            }
            MockBehaviour::Flaky { failures } if previous_calls < *failures => {
                Err(TransportError::Connect {
                    url: request.url.clone(),
                    message: format!("simulated failure {}/{}", previous_calls + 1, failures),
                })
            }
            MockBehaviour::Flaky { .. } => Ok(Self::echo_result(request)),
        };

        self.note(format!("end:{}", request.node_id));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_override_the_default() {
        let mock = MockInvoker::echo().route(
            "http://svc/broken",
            MockBehaviour::Respond { status: 503, body: json!({ "retry": false }) },
        );

        let ok = mock
            .invoke(&InvocationRequest::post("a", "http://svc/fine", json!({ "x": 1 })))
            .await
            .unwrap();
        assert_eq!(ok.status_code, 200);
        assert_eq!(ok.body["payload"]["x"], 1);

        let broken = mock
            .invoke(&InvocationRequest::post("b", "http://svc/broken", json!({})))
            .await
            .unwrap();
        assert_eq!(broken.status_code, 503);

        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.journal(), vec!["start:a", "end:a", "start:b", "end:b"]);
    }

    #[tokio::test]
    async fn flaky_recovers_after_configured_failures() {
        let mock = MockInvoker::with_default(MockBehaviour::Flaky { failures: 2 });
        let req = InvocationRequest::post("n", "http://svc/flaky", json!({}));

        assert!(mock.invoke(&req).await.is_err());
        assert!(mock.invoke(&req).await.is_err());
        assert!(mock.invoke(&req).await.is_ok());
        assert_eq!(mock.calls_to("http://svc/flaky"), 3);
    }
}
