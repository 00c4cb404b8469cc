mod definitions;
mod functions;
mod results;

pub use definitions::{
    AgenticFunction,
    CodeFunction,
    FunctionDefinition,
    FunctionSpec,
    InvocationConfig,
    SandboxPolicy,
    TimeoutSpec,
    ToolDefinition,
    ToolImplementation,
};
pub use functions::{
    CodeSource,
    FunctionId,
    FunctionVersion,
    IsolateKind,
    Language,
};
pub use results::{
    AgenticExecutionReport,
    ApprovalRecord,
    CostEstimate,
    ExecutionMetadata,
    ExecutionMetrics,
    ExecutionResult,
    ExecutionStatus,
    IterationRecord,
    ToolCallRecord,
};
