//! Shared domain model and ambient infrastructure for the Lattice
//! invocation plane: function identity and definitions, execution contexts,
//! the virtualized [`runtime::Runtime`], environment knobs, the outbound URL
//! guard, and the HTTP routing surface.

pub mod cancellation;
pub mod duration;
pub mod env;
pub mod execution_context;
pub mod http;
pub mod knobs;
pub mod runtime;
pub mod sha256;
pub mod types;
pub mod url_guard;

pub use execution_context::{
    ExecutionContext,
    ExecutionId,
    RequestId,
};
