//! The invocation dispatcher: admission through the rate limiter, a root
//! span around the execution, and dispatch to the code or agentic executor
//! by function kind.

use std::{
    collections::HashMap,
    sync::Arc,
};

use agentic::AgenticExecutor;
use async_trait::async_trait;
use common::{
    execution_context::ExecutionContext,
    http::client_ip,
    runtime::Runtime,
    types::{
        ExecutionResult,
        ExecutionStatus,
        FunctionId,
        FunctionSpec,
        InvocationConfig,
    },
};
use http::HeaderMap;
use isolate::CodeExecutor;
use rate_limiter::{
    AggregateDecision,
    RateLimiterClient,
};
use serde_json::Value as JsonValue;
use tracer::{
    propagation,
    SpanKind,
    SpanOptions,
    SpanStatusCode,
    Tracer,
};

use crate::registry::FunctionRegistry;

/// The dispatcher's verdict on one invocation request.
pub enum InvokeOutcome {
    /// Admission was denied; the HTTP layer renders the 429 surface.
    RateLimited(AggregateDecision),
    Executed(Box<ExecutionResult>),
}

pub struct Dispatcher<RT: Runtime> {
    runtime: RT,
    registry: FunctionRegistry,
    rate_limiter: RateLimiterClient<RT>,
    tracer: Tracer<RT>,
    code_executor: Arc<CodeExecutor<RT>>,
    agentic_executor: Arc<AgenticExecutor<RT>>,
}

impl<RT: Runtime> Dispatcher<RT> {
    pub fn new(
        runtime: RT,
        registry: FunctionRegistry,
        rate_limiter: RateLimiterClient<RT>,
        tracer: Tracer<RT>,
        code_executor: Arc<CodeExecutor<RT>>,
        agentic_executor: Arc<AgenticExecutor<RT>>,
    ) -> Self {
        Self {
            runtime,
            registry,
            rate_limiter,
            tracer,
            code_executor,
            agentic_executor,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn tracer(&self) -> &Tracer<RT> {
        &self.tracer
    }

    pub fn agentic_executor(&self) -> &AgenticExecutor<RT> {
        &self.agentic_executor
    }

    /// Route one invocation: validate the id, admit it through every
    /// rate-limit category, execute under a root span, and export.
    pub async fn invoke(
        &self,
        raw_function_id: &str,
        input: JsonValue,
        headers: &HeaderMap,
        config: Option<&InvocationConfig>,
        context: Option<ExecutionContext>,
    ) -> anyhow::Result<InvokeOutcome> {
        let function_id = FunctionId::parse(raw_function_id)?;
        let definition = self.registry.require(&function_id)?;

        let keys = HashMap::from([
            ("ip".to_string(), client_ip(headers)),
            ("function".to_string(), function_id.to_string()),
        ]);
        let admission = self.rate_limiter.check_and_increment_all(&keys);
        if !admission.allowed {
            tracing::info!(
                "Rate limited invocation of {function_id} (category {:?})",
                admission.blocking_category
            );
            return Ok(InvokeOutcome::RateLimited(admission));
        }

        let parent_context = propagation::extract(headers);
        let span = self.tracer.start_span(
            &format!("invoke {function_id}"),
            SpanOptions {
                parent_context: parent_context.as_ref(),
                kind: SpanKind::Server,
                ..SpanOptions::new()
            },
        );
        span.set_attribute("faas.id", function_id.to_string());
        span.set_attribute("faas.kind", definition.spec.kind());

        let result = match &definition.spec {
            FunctionSpec::Code(_) => {
                self.code_executor
                    .execute(&definition, input, config, context)
                    .await
            },
            FunctionSpec::Agentic(_) => {
                self.agentic_executor
                    .execute(&definition, input, config, context)
                    .await
            },
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                // Resolution-phase failure: mark the span and propagate.
                span.set_status(SpanStatusCode::Error, Some(e.to_string()));
                span.end();
                self.tracer.flush().await;
                return Err(e);
            },
        };

        span.set_attribute("faas.execution_id", result.execution_id.to_string());
        span.set_attribute("faas.status", result.status.to_string());
        match result.status {
            ExecutionStatus::Completed => span.set_status(SpanStatusCode::Ok, None),
            _ => {
                let message = result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| result.status.to_string());
                span.set_status(SpanStatusCode::Error, Some(message.clone()));
                if let Some(error) = &result.error {
                    span.record_exception(
                        tracer::ExceptionRecord {
                            exception_type: error.name.clone(),
                            message: error.message.clone(),
                            stacktrace: error.stack.clone(),
                        },
                        None,
                    );
                }
            },
        }
        span.end();
        self.tracer.flush().await;
        Ok(InvokeOutcome::Executed(Box::new(result)))
    }

    /// Current unix milliseconds, for the HTTP layer's retry arithmetic.
    pub fn now_ms(&self) -> u64 {
        self.runtime.unix_timestamp().as_millis()
    }
}

/// Function-backed tools route back through the code executor.
pub struct DispatcherInvoker<RT: Runtime> {
    registry: FunctionRegistry,
    code_executor: Arc<CodeExecutor<RT>>,
}

impl<RT: Runtime> DispatcherInvoker<RT> {
    pub fn new(registry: FunctionRegistry, code_executor: Arc<CodeExecutor<RT>>) -> Self {
        Self {
            registry,
            code_executor,
        }
    }
}

#[async_trait]
impl<RT: Runtime> agentic::FunctionInvoker for DispatcherInvoker<RT> {
    async fn invoke(&self, function_id: &FunctionId, input: JsonValue) -> anyhow::Result<JsonValue> {
        let definition = self.registry.require(function_id)?;
        let result = self
            .code_executor
            .execute(&definition, input, None, None)
            .await?;
        match result.status {
            ExecutionStatus::Completed => Ok(result.output.unwrap_or(JsonValue::Null)),
            _ => {
                let message = result
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| result.status.to_string());
                anyhow::bail!("function tool {function_id} failed: {message}")
            },
        }
    }
}
