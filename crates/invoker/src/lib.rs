//! `invoker` crate: the outbound half of the engine.
//!
//! Holds the [`ActionInvoker`] contract used by queue workers, the reqwest
//! backed [`HttpInvoker`], the immutable [`ServiceRegistry`] and the request /
//! result types that travel through the dispatch queue.

pub mod error;
pub mod http;
pub mod mock;
pub mod registry;
pub mod request;
pub mod traits;

pub use error::TransportError;
pub use http::HttpInvoker;
pub use registry::ServiceRegistry;
pub use request::{ExecutionResult, HttpMethod, InvocationRequest};
pub use traits::ActionInvoker;
