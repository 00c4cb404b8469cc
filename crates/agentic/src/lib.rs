//! The agentic-execution core: a bounded think/act/observe loop with
//! tool calling, per-execution memory, approval gating, and token-budget
//! enforcement.

pub mod approval;
pub mod budget;
mod executor;
mod metrics;
pub mod model;
pub mod tools;

pub use approval::{
    ApprovalGate,
    ApprovalOutcome,
    ApprovalResponse,
};
pub use budget::TokenPricing;
pub use executor::{
    AgenticExecutor,
    IterationContext,
    IterationOutcome,
    LoopState,
};
pub use model::{
    Message,
    MessageContent,
    MessageRole,
    ModelClient,
    ModelRequest,
    ModelResponse,
    PresentedTool,
    StopReason,
    TokenUsage,
    ToolCallRequest,
};
pub use tools::{
    FunctionInvoker,
    ToolContext,
    ToolHandler,
    ToolRouter,
};
