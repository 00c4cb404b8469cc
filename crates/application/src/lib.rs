//! The invocation plane glued together: registry, rate-limit admission,
//! tracing, and dispatch to the code and agentic executors, behind an axum
//! HTTP surface.

pub mod dispatcher;
pub mod registry;
pub mod router;

pub use dispatcher::{
    Dispatcher,
    DispatcherInvoker,
    InvokeOutcome,
};
pub use registry::FunctionRegistry;
pub use router::router;
