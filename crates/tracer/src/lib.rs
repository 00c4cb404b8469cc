//! W3C-compatible distributed tracing for the invocation plane: span
//! lifecycle, context propagation, sampling, and buffered batched export in
//! OpenTelemetry shape.

mod context;
pub mod export;
pub mod ids;
mod metrics;
pub mod propagation;
pub mod sampler;
mod span;
mod tracer;

pub use context::TraceContext;
pub use export::{
    ConsoleExporter,
    ExportedSpan,
    ExportedTrace,
    NoopExporter,
    OtelBatchExporter,
    SpanExporter,
};
pub use sampler::{
    RateLimitingSampler,
    Sampler,
    SamplingContext,
    SamplingDecision,
};
pub use span::{
    AttributeValue,
    Attributes,
    ExceptionRecord,
    Span,
    SpanKind,
    SpanLink,
    SpanStatus,
    SpanStatusCode,
};
pub use tracer::{
    SpanOptions,
    Tracer,
    TracerConfig,
};
