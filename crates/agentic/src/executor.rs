//! The bounded think/act/observe loop.
//!
//! Each iteration asks the model for the next step, executes up to the
//! per-iteration cap of tool calls (validating, approval-gating, and
//! recording each one), feeds the results back, and stops on goal
//! achievement, iteration exhaustion, budget exhaustion, timeout, or
//! cancellation. Tool and model failures fold into the result; they never
//! escape to the caller.

use std::{
    collections::{
        BTreeSet,
        HashMap,
    },
    sync::Arc,
    time::Duration,
};

use common::{
    execution_context::{
        ExecutionContext,
        ExecutionId,
    },
    knobs,
    runtime::Runtime,
    types::{
        AgenticExecutionReport,
        AgenticFunction,
        ApprovalRecord,
        ExecutionMetadata,
        ExecutionMetrics,
        ExecutionResult,
        ExecutionStatus,
        FunctionDefinition,
        FunctionSpec,
        InvocationConfig,
        IterationRecord,
        ToolCallRecord,
        ToolDefinition,
    },
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
    StructuredError,
};
use serde_json::Value as JsonValue;

use crate::{
    approval::{
        ApprovalGate,
        ApprovalOutcome,
    },
    budget::TokenPricing,
    metrics,
    model::{
        Message,
        ModelClient,
        ModelRequest,
        ModelResponse,
        PresentedTool,
        StopReason,
    },
    tools::{
        validate_tool_input,
        ToolContext,
        ToolHandler,
        ToolRouter,
    },
};

/// Explicit loop state, exposed so one iteration can be driven and
/// inspected in isolation via [`AgenticExecutor::execute_iteration`].
#[derive(Default)]
pub struct LoopState {
    pub iteration: u32,
    /// Full conversation history, goal first.
    pub memory: Vec<Message>,
    /// Messages produced by the most recent iteration only; what the model
    /// sees when memory is disabled.
    pub last_round: Vec<Message>,
    pub trace: Vec<IterationRecord>,
    pub tools_used: BTreeSet<String>,
    pub goal_achieved: bool,
    pub last_content: Option<String>,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning: Vec<String>,
}

/// Everything one iteration needs that does not change across iterations.
pub struct IterationContext {
    pub execution_id: ExecutionId,
    pub model: String,
    pub system_prompt: String,
    pub enable_memory: bool,
    pub enable_reasoning: bool,
    pub max_tool_calls: u32,
    pub approval_timeout: Duration,
    pub presented: Vec<Arc<ToolDefinition>>,
    pub handlers: HashMap<String, ToolHandler>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum IterationOutcome {
    Continue,
    GoalAchieved,
}

enum LoopEnd {
    GoalAchieved,
    IterationsExhausted,
    BudgetExhausted,
    TimedOut,
    Cancelled,
    ModelFailed(anyhow::Error),
}

pub struct AgenticExecutor<RT: Runtime> {
    runtime: RT,
    model: Arc<dyn ModelClient>,
    tools: ToolRouter,
    approvals: Arc<ApprovalGate>,
    pricing: Option<TokenPricing>,
    approval_timeout: Option<Duration>,
}

impl<RT: Runtime> AgenticExecutor<RT> {
    pub fn new(runtime: RT, model: Arc<dyn ModelClient>, tools: ToolRouter) -> Self {
        Self {
            runtime,
            model,
            tools,
            approvals: Arc::new(ApprovalGate::new()),
            pricing: None,
            approval_timeout: None,
        }
    }

    pub fn with_pricing(mut self, pricing: TokenPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Override the approval timeout. By default a parked approval waits as
    /// long as the execution itself may run.
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    /// The gate external surfaces deliver approval decisions through.
    pub fn approval_gate(&self) -> Arc<ApprovalGate> {
        self.approvals.clone()
    }

    pub async fn execute(
        &self,
        definition: &FunctionDefinition,
        input: JsonValue,
        config: Option<&InvocationConfig>,
        context: Option<ExecutionContext>,
    ) -> anyhow::Result<ExecutionResult> {
        let FunctionSpec::Agentic(agentic) = &definition.spec else {
            anyhow::bail!(ErrorMetadata::bad_request(
                "NotAnAgenticFunction",
                format!("{} is not an agentic function", definition.id),
            ));
        };
        let _timer = metrics::execute_timer();
        let context = context.unwrap_or_default();
        let execution_id = context
            .execution_id
            .clone()
            .unwrap_or_else(ExecutionId::generate);
        let started_at = self.runtime.unix_timestamp().as_millis();
        let start = std::time::Instant::now();
        let input_size = json_size(&input);

        let effective = config.cloned().unwrap_or_default();
        let model_id = effective
            .model
            .clone()
            .unwrap_or_else(|| agentic.model.clone());
        let max_iterations = match effective.max_iterations {
            Some(override_n) => agentic.max_iterations.min(override_n),
            None => agentic.max_iterations,
        };
        let timeout = self.resolve_timeout(agentic, &effective, &context)?;
        let token_budget = effective.token_budget;

        // Tools without resolvable handlers are hidden from the model on
        // every call.
        let mut presented = Vec::new();
        let mut handlers = HashMap::new();
        for tool in &agentic.tools {
            if let Some(handler) = self.tools.resolve(tool) {
                handlers.insert(tool.name.clone(), handler);
                presented.push(Arc::new(tool.clone()));
            } else {
                tracing::debug!("Hiding tool {:?}: no resolvable handler", tool.name);
            }
        }
        let iteration_ctx = IterationContext {
            execution_id: execution_id.clone(),
            model: model_id.clone(),
            system_prompt: agentic.system_prompt.clone(),
            enable_memory: agentic.enable_memory,
            enable_reasoning: agentic.enable_reasoning,
            max_tool_calls: agentic.max_tool_calls_per_iteration,
            approval_timeout: self.approval_timeout.unwrap_or(timeout),
            presented,
            handlers,
        };

        let mut state = LoopState::default();
        let mut goal = Message::user(agentic.goal.clone());
        if !input.is_null() {
            goal = Message::user(format!(
                "{}\n\nInput: {}",
                agentic.goal,
                serde_json::to_string(&input).unwrap_or_default()
            ));
        }
        state.memory.push(goal);

        // A signal tripped before the first model call means zero
        // collaborator calls.
        if context.is_aborted() {
            let metrics_out = ExecutionMetrics {
                duration_ms: ms_since(start),
                input_size_bytes: input_size,
                ..Default::default()
            };
            return Ok(self.finish(
                definition,
                execution_id,
                started_at,
                ExecutionStatus::Cancelled,
                None,
                Some(cancelled_error()),
                metrics_out,
                None,
            ));
        }

        let abort = context.abort.clone();
        let aborted = async {
            match &abort {
                Some(signal) => signal.aborted().await,
                None => futures::future::pending::<()>().await,
            }
        };
        let end = tokio::select! {
            biased;
            _ = aborted => LoopEnd::Cancelled,
            _ = self.runtime.wait(timeout) => {
                tracing::info!(
                    "Agentic execution of {} timed out after {}ms",
                    definition.id,
                    timeout.as_millis()
                );
                LoopEnd::TimedOut
            },
            end = self.run_loop(&mut state, &iteration_ctx, max_iterations, token_budget, &context) => end,
        };

        let output = state.last_content.as_deref().map(parse_output);
        let (status, output, error) = match end {
            LoopEnd::GoalAchieved | LoopEnd::IterationsExhausted => {
                (ExecutionStatus::Completed, output, None)
            },
            LoopEnd::TimedOut => (
                ExecutionStatus::Timeout,
                None,
                Some(StructuredError::from_metadata(&ErrorMetadata::timeout(
                    "AgenticExecutionTimeout",
                    format!("agentic execution exceeded the {}ms timeout", timeout.as_millis()),
                ))),
            ),
            LoopEnd::BudgetExhausted => (
                ExecutionStatus::Failed,
                None,
                Some(StructuredError::from_metadata(
                    &ErrorMetadata::token_budget_exceeded(format!(
                        "token budget exhausted: {} tokens consumed of {}",
                        state.total_tokens,
                        token_budget.unwrap_or(0),
                    )),
                )),
            ),
            LoopEnd::Cancelled => (ExecutionStatus::Cancelled, None, Some(cancelled_error())),
            LoopEnd::ModelFailed(e) => (ExecutionStatus::Failed, None, Some(e.structured())),
        };

        let report = AgenticExecutionReport {
            iterations: state.iteration,
            goal_achieved: state.goal_achieved,
            tools_used: state.tools_used.clone(),
            total_tokens: state.total_tokens,
            reasoning_summary: if agentic.enable_reasoning && !state.reasoning.is_empty() {
                Some(state.reasoning.join("\n"))
            } else {
                None
            },
            model: model_id,
            cost_estimate: self
                .pricing
                .as_ref()
                .map(|p| p.estimate(state.input_tokens, state.output_tokens)),
            trace: std::mem::take(&mut state.trace),
        };
        let metrics_out = ExecutionMetrics {
            duration_ms: ms_since(start),
            input_size_bytes: input_size,
            output_size_bytes: output.as_ref().map(json_size).unwrap_or(0),
            ..Default::default()
        };
        Ok(self.finish(
            definition,
            execution_id,
            started_at,
            status,
            output,
            error,
            metrics_out,
            Some(report),
        ))
    }

    async fn run_loop(
        &self,
        state: &mut LoopState,
        ctx: &IterationContext,
        max_iterations: u32,
        token_budget: Option<u64>,
        context: &ExecutionContext,
    ) -> LoopEnd {
        for _ in 0..max_iterations {
            if context.is_aborted() {
                return LoopEnd::Cancelled;
            }
            // Budget enforcement is post-hoc: tokens already consumed are
            // compared before the next call, so one over-budget call is
            // still recorded.
            if let Some(budget) = token_budget {
                if state.total_tokens >= budget {
                    return LoopEnd::BudgetExhausted;
                }
            }
            match self.execute_iteration(state, ctx).await {
                Ok(IterationOutcome::GoalAchieved) => return LoopEnd::GoalAchieved,
                Ok(IterationOutcome::Continue) => {},
                Err(e) => return LoopEnd::ModelFailed(e),
            }
        }
        state.goal_achieved = false;
        LoopEnd::IterationsExhausted
    }

    /// Run exactly one think/act/observe step. Errors are model-client
    /// failures; tool failures are recorded in the iteration trace and do
    /// not error.
    pub async fn execute_iteration(
        &self,
        state: &mut LoopState,
        ctx: &IterationContext,
    ) -> anyhow::Result<IterationOutcome> {
        let iteration = state.iteration + 1;
        let timestamp = self.runtime.unix_timestamp().as_millis();
        let iteration_start = std::time::Instant::now();

        let messages = if ctx.enable_memory {
            state.memory.clone()
        } else {
            // Without memory the model sees only the goal and the previous
            // round's tool results.
            let mut messages: Vec<Message> = state.memory.first().cloned().into_iter().collect();
            messages.extend(state.last_round.iter().cloned());
            messages
        };
        let request = ModelRequest {
            model: ctx.model.clone(),
            system_prompt: ctx.system_prompt.clone(),
            messages,
            tools: ctx
                .presented
                .iter()
                .map(|t| PresentedTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect(),
            enable_reasoning: ctx.enable_reasoning,
        };
        let response = match self.model.complete(request).await {
            Ok(response) => response,
            // Fail with the client's own error, classifying it as a
            // transport failure only when it arrived unclassified.
            Err(e) if e.downcast_ref::<ErrorMetadata>().is_some() => return Err(e),
            Err(e) => {
                return Err(e.context(ErrorMetadata::transport(
                    "ModelClientFailed",
                    "the model client returned an error",
                )))
            },
        };
        metrics::log_model_call(&ctx.model);

        state.iteration = iteration;
        state.total_tokens += response.usage.total();
        state.input_tokens += response.usage.input_tokens;
        state.output_tokens += response.usage.output_tokens;
        if let Some(reasoning) = &response.reasoning {
            state.reasoning.push(reasoning.clone());
        }
        state.last_content = Some(response.content.clone());

        let mut record = IterationRecord {
            iteration,
            timestamp,
            reasoning: response.reasoning.clone(),
            tool_calls: Vec::new(),
            tokens: response.usage.total(),
            duration_ms: 0,
        };

        if response.stop_reason == StopReason::EndTurn {
            state.goal_achieved = true;
            record.duration_ms = ms_since(iteration_start);
            state.trace.push(record);
            return Ok(IterationOutcome::GoalAchieved);
        }

        let round = self.run_tool_calls(state, ctx, &response, &mut record).await;
        record.duration_ms = ms_since(iteration_start);
        state.trace.push(record);
        state.memory.extend(round.iter().cloned());
        state.last_round = round;
        Ok(IterationOutcome::Continue)
    }

    /// Execute the accepted prefix of the requested tool calls and build
    /// the messages to feed back.
    async fn run_tool_calls(
        &self,
        state: &mut LoopState,
        ctx: &IterationContext,
        response: &ModelResponse,
        record: &mut IterationRecord,
    ) -> Vec<Message> {
        let accepted = &response.tool_calls[..response
            .tool_calls
            .len()
            .min(ctx.max_tool_calls as usize)];
        let dropped = response.tool_calls.len() - accepted.len();
        if dropped > 0 {
            // The overflow is dropped, never deferred: the model may
            // re-request those calls next iteration.
            tracing::debug!("Dropping {dropped} tool calls over the per-iteration cap");
        }

        let mut round = vec![Message::assistant_tool_calls(accepted.to_vec())];
        for call in accepted {
            let call_start = std::time::Instant::now();
            let mut call_record = ToolCallRecord {
                tool: call.name.clone(),
                input: call.input.clone(),
                output: None,
                success: false,
                error: None,
                approval: None,
                duration_ms: 0,
            };
            let definition = ctx.presented.iter().find(|t| t.name == call.name);
            match definition {
                None => {
                    call_record.error = Some(format!(
                        "no handler registered for tool {:?}",
                        call.name
                    ));
                },
                Some(definition) => {
                    if let Err(validation) = validate_tool_input(definition, &call.input) {
                        call_record.error = Some(validation);
                    } else {
                        let approved = if definition.requires_approval {
                            let outcome = self
                                .approvals
                                .wait_for_approval(
                                    &ctx.execution_id,
                                    &call.name,
                                    ctx.approval_timeout,
                                )
                                .await;
                            match outcome {
                                ApprovalOutcome::Granted { approved_by } => {
                                    call_record.approval = Some(ApprovalRecord {
                                        required: true,
                                        granted: true,
                                        approved_by,
                                    });
                                    true
                                },
                                ApprovalOutcome::Denied => {
                                    call_record.approval = Some(ApprovalRecord {
                                        required: true,
                                        granted: false,
                                        approved_by: None,
                                    });
                                    call_record.error = Some("approval denied".to_string());
                                    false
                                },
                                ApprovalOutcome::TimedOut => {
                                    call_record.approval = Some(ApprovalRecord {
                                        required: true,
                                        granted: false,
                                        approved_by: None,
                                    });
                                    call_record.error = Some("approval timed out".to_string());
                                    false
                                },
                            }
                        } else {
                            true
                        };
                        if approved {
                            let handler = ctx
                                .handlers
                                .get(&call.name)
                                .expect("presented tools always have handlers");
                            let tool_ctx = ToolContext {
                                execution_id: ctx.execution_id.clone(),
                                tool: definition.clone(),
                            };
                            state.tools_used.insert(call.name.clone());
                            metrics::log_tool_call(&call.name);
                            match handler(call.input.clone(), tool_ctx).await {
                                Ok(output) => {
                                    call_record.success = true;
                                    call_record.output = Some(output);
                                },
                                Err(e) => {
                                    // Tool handler failure is non-fatal.
                                    call_record.error = Some(e.to_string());
                                },
                            }
                        }
                    }
                },
            }
            call_record.duration_ms = ms_since(call_start);
            round.push(Message::tool_result(
                call.name.clone(),
                call_record
                    .output
                    .clone()
                    .unwrap_or_else(|| {
                        JsonValue::String(
                            call_record.error.clone().unwrap_or_default(),
                        )
                    }),
                call_record.success,
            ));
            record.tool_calls.push(call_record);
        }
        round
    }

    /// Run one tool directly, outside the loop. Fails with a clear error
    /// when no handler is registered.
    pub async fn execute_tool(
        &self,
        tool: &ToolDefinition,
        input: JsonValue,
        execution_id: &ExecutionId,
    ) -> anyhow::Result<JsonValue> {
        let handler = self.tools.resolve(tool).ok_or_else(|| {
            anyhow::anyhow!(ErrorMetadata::not_found(
                "ToolHandlerMissing",
                format!("no handler registered for tool {:?}", tool.name),
            ))
        })?;
        let ctx = ToolContext {
            execution_id: execution_id.clone(),
            tool: Arc::new(tool.clone()),
        };
        handler(input, ctx).await
    }

    fn resolve_timeout(
        &self,
        agentic: &AgenticFunction,
        effective: &InvocationConfig,
        context: &ExecutionContext,
    ) -> anyhow::Result<Duration> {
        if let Some(spec) = &effective.timeout {
            return spec.as_duration();
        }
        if let Some(spec) = &agentic.timeout {
            return spec.as_duration();
        }
        if let Some(override_timeout) = context.timeout_override {
            return Ok(override_timeout);
        }
        Ok(*knobs::AGENTIC_EXECUTION_TIMEOUT)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        definition: &FunctionDefinition,
        execution_id: ExecutionId,
        started_at: u64,
        status: ExecutionStatus,
        output: Option<JsonValue>,
        error: Option<StructuredError>,
        metrics_out: ExecutionMetrics,
        report: Option<AgenticExecutionReport>,
    ) -> ExecutionResult {
        metrics::log_execution(&status.to_string());
        ExecutionResult {
            function_id: definition.id.clone(),
            function_version: definition.version.clone(),
            execution_id,
            status,
            output,
            error,
            metadata: ExecutionMetadata {
                started_at,
                completed_at: self.runtime.unix_timestamp().as_millis(),
            },
            metrics: metrics_out,
            agentic_execution: report,
        }
    }
}

/// JSON-parse the final content when it round-trips, otherwise return the
/// raw string.
fn parse_output(content: &str) -> JsonValue {
    match serde_json::from_str::<JsonValue>(content) {
        Ok(value) => value,
        Err(_) => JsonValue::String(content.to_string()),
    }
}

fn cancelled_error() -> StructuredError {
    StructuredError::from_metadata(&ErrorMetadata::cancelled(
        "ExecutionCancelled",
        "execution aborted by caller",
    ))
}

fn json_size(value: &JsonValue) -> u64 {
    serde_json::to_string(value).map(|s| s.len() as u64).unwrap_or(0)
}

fn ms_since(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::Duration,
    };

    use common::{
        cancellation::AbortSignal,
        execution_context::ExecutionContext,
        runtime::testing::TestRuntime,
        types::{
            AgenticFunction,
            ExecutionStatus,
            FunctionDefinition,
            FunctionId,
            FunctionSpec,
            FunctionVersion,
            InvocationConfig,
            TimeoutSpec,
            ToolDefinition,
            ToolImplementation,
        },
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::AgenticExecutor;
    use crate::{
        approval::ApprovalResponse,
        budget::TokenPricing,
        model::{
            ModelClient,
            ModelRequest,
            ModelResponse,
            StopReason,
            TokenUsage,
            ToolCallRequest,
        },
        tools::{
            ToolHandler,
            ToolRouter,
        },
    };

    /// Replays a fixed script of responses and captures every request.
    struct ScriptedModel {
        responses: Mutex<Vec<ModelResponse>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(mut responses: Vec<ModelResponse>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait::async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(&self, request: ModelRequest) -> anyhow::Result<ModelResponse> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn end_turn(content: &str, tokens: u64) -> ModelResponse {
        ModelResponse {
            content: content.to_string(),
            reasoning: None,
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input_tokens: tokens / 2,
                output_tokens: tokens - tokens / 2,
            },
        }
    }

    fn tool_use(calls: Vec<ToolCallRequest>, tokens: u64) -> ModelResponse {
        ModelResponse {
            content: "working on it".to_string(),
            reasoning: None,
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens: tokens / 2,
                output_tokens: tokens - tokens / 2,
            },
        }
    }

    fn call(name: &str, input: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call-{name}"),
            name: name.to_string(),
            input,
        }
    }

    fn lookup_tool(requires_approval: bool) -> ToolDefinition {
        ToolDefinition {
            name: "lookup".to_string(),
            description: "Look something up".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"],
            }),
            implementation: ToolImplementation::Builtin {
                name: "lookup".to_string(),
            },
            requires_approval,
        }
    }

    fn definition(tools: Vec<ToolDefinition>) -> FunctionDefinition {
        FunctionDefinition {
            id: FunctionId::parse("demo/agent").unwrap(),
            version: FunctionVersion::Latest,
            spec: FunctionSpec::Agentic(AgenticFunction {
                system_prompt: "You are a research agent.".to_string(),
                goal: "Answer the question.".to_string(),
                tools,
                enable_memory: true,
                enable_reasoning: false,
                max_iterations: 10,
                max_tool_calls_per_iteration: 5,
                timeout: None,
                model: "sonnet-4".to_string(),
                output_schema: None,
            }),
        }
    }

    fn router_with_lookup() -> ToolRouter {
        let mut router = ToolRouter::new();
        let handler: ToolHandler = Arc::new(|input, _ctx| {
            Box::pin(async move { Ok(json!({ "results": [input["query"]] })) })
        });
        router.register("lookup", handler);
        router
    }

    fn executor(
        model: Arc<ScriptedModel>,
        router: ToolRouter,
    ) -> AgenticExecutor<TestRuntime> {
        AgenticExecutor::new(TestRuntime::new(), model, router)
    }

    #[tokio::test]
    async fn test_goal_achieved_on_end_turn() {
        let model = ScriptedModel::new(vec![end_turn("{\"answer\": 42}", 100)]);
        let executor = executor(model.clone(), router_with_lookup());
        let result = executor
            .execute(&definition(vec![lookup_tool(false)]), json!(null), None, None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        // JSON content round-trips into a structured output.
        assert_eq!(result.output, Some(json!({"answer": 42})));
        let report = result.agentic_execution.unwrap();
        assert!(report.goal_achieved);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.total_tokens, 100);
        assert_eq!(report.model, "sonnet-4");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_json_output_stays_a_string() {
        let model = ScriptedModel::new(vec![end_turn("plain prose answer", 10)]);
        let executor = executor(model, router_with_lookup());
        let result = executor
            .execute(&definition(vec![]), json!(null), None, None)
            .await
            .unwrap();
        assert_eq!(result.output, Some(json!("plain prose answer")));
    }

    #[tokio::test]
    async fn test_tool_round_trip_then_answer() {
        let model = ScriptedModel::new(vec![
            tool_use(vec![call("lookup", json!({"query": "rust"}))], 50),
            end_turn("done", 30),
        ]);
        let executor = executor(model.clone(), router_with_lookup());
        let result = executor
            .execute(&definition(vec![lookup_tool(false)]), json!(null), None, None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        let report = result.agentic_execution.unwrap();
        assert_eq!(report.iterations, 2);
        assert_eq!(report.total_tokens, 80);
        assert!(report.tools_used.contains("lookup"));
        let first = &report.trace[0];
        assert_eq!(first.tool_calls.len(), 1);
        assert!(first.tool_calls[0].success);
        assert_eq!(
            first.tool_calls[0].output,
            Some(json!({"results": ["rust"]}))
        );
        // The second request carries the tool results back to the model.
        let requests = model.requests.lock();
        assert!(requests[1].messages.len() > requests[0].messages.len());
    }

    #[tokio::test]
    async fn test_tool_call_cap_drops_overflow() {
        let calls: Vec<ToolCallRequest> = (0..5)
            .map(|i| call("lookup", json!({"query": format!("q{i}")})))
            .collect();
        let model = ScriptedModel::new(vec![tool_use(calls, 50), end_turn("done", 10)]);
        let executor = executor(model, router_with_lookup());
        let mut def = definition(vec![lookup_tool(false)]);
        if let FunctionSpec::Agentic(agentic) = &mut def.spec {
            agentic.max_tool_calls_per_iteration = 3;
        }
        let result = executor.execute(&def, json!(null), None, None).await.unwrap();
        let report = result.agentic_execution.unwrap();
        let executed = &report.trace[0].tool_calls;
        // Exactly the first three run; the other two are dropped, not
        // deferred.
        assert_eq!(executed.len(), 3);
        assert!(executed.iter().all(|c| c.success));
        assert_eq!(report.trace.len(), 2);
        assert!(report.trace[1].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_exhaustion_returns_partial_output() {
        let responses: Vec<ModelResponse> = (0..4)
            .map(|_| tool_use(vec![call("lookup", json!({"query": "again"}))], 10))
            .collect();
        let model = ScriptedModel::new(responses);
        let executor = executor(model.clone(), router_with_lookup());
        let mut def = definition(vec![lookup_tool(false)]);
        if let FunctionSpec::Agentic(agentic) = &mut def.spec {
            agentic.max_iterations = 4;
        }
        let result = executor.execute(&def, json!(null), None, None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        let report = result.agentic_execution.unwrap();
        assert_eq!(report.iterations, 4);
        assert!(!report.goal_achieved);
        assert_eq!(result.output, Some(json!("working on it")));
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn test_max_iterations_override_takes_minimum() {
        let responses: Vec<ModelResponse> = (0..10)
            .map(|_| tool_use(vec![], 10))
            .collect();
        let model = ScriptedModel::new(responses);
        let executor = executor(model.clone(), router_with_lookup());
        let config = InvocationConfig {
            max_iterations: Some(2),
            ..Default::default()
        };
        let result = executor
            .execute(&definition(vec![]), json!(null), Some(&config), None)
            .await
            .unwrap();
        assert_eq!(result.agentic_execution.unwrap().iterations, 2);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_token_budget_halts_before_next_call() {
        let responses: Vec<ModelResponse> = (0..10)
            .map(|_| tool_use(vec![], 80))
            .collect();
        let model = ScriptedModel::new(responses);
        let executor = executor(model.clone(), router_with_lookup());
        let config = InvocationConfig {
            token_budget: Some(100),
            ..Default::default()
        };
        let result = executor
            .execute(&definition(vec![]), json!(null), Some(&config), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().message.contains("budget"));
        // 80 tokens after call one is under budget; 160 after call two is
        // over, so the third call never happens.
        assert_eq!(model.calls(), 2);
        assert_eq!(result.agentic_execution.unwrap().total_tokens, 160);
    }

    #[tokio::test]
    async fn test_unknown_tool_records_handler_error() {
        let model = ScriptedModel::new(vec![
            tool_use(vec![call("imaginary", json!({}))], 10),
            end_turn("done", 10),
        ]);
        let executor = executor(model, router_with_lookup());
        let result = executor
            .execute(&definition(vec![lookup_tool(false)]), json!(null), None, None)
            .await
            .unwrap();
        let report = result.agentic_execution.unwrap();
        let record = &report.trace[0].tool_calls[0];
        assert!(!record.success);
        assert!(record.error.as_ref().unwrap().contains("handler"));
        assert!(!report.tools_used.contains("imaginary"));
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_without_invocation() {
        let model = ScriptedModel::new(vec![
            tool_use(vec![call("lookup", json!({"query": 42}))], 10),
            end_turn("done", 10),
        ]);
        let executor = executor(model, router_with_lookup());
        let result = executor
            .execute(&definition(vec![lookup_tool(false)]), json!(null), None, None)
            .await
            .unwrap();
        let report = result.agentic_execution.unwrap();
        let record = &report.trace[0].tool_calls[0];
        assert!(!record.success);
        assert!(record.error.as_ref().unwrap().contains("validation"));
        // The handler never ran, so the tool is not counted as used.
        assert!(!report.tools_used.contains("lookup"));
    }

    #[tokio::test]
    async fn test_unresolvable_tools_are_hidden_from_the_model() {
        let model = ScriptedModel::new(vec![end_turn("done", 10)]);
        let executor = executor(model.clone(), router_with_lookup());
        let mut unresolvable = lookup_tool(false);
        unresolvable.name = "ghost".to_string();
        unresolvable.implementation = ToolImplementation::Builtin {
            name: "notRegistered".to_string(),
        };
        let def = definition(vec![lookup_tool(false), unresolvable]);
        executor.execute(&def, json!(null), None, None).await.unwrap();
        let requests = model.requests.lock();
        let presented: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(presented, vec!["lookup"]);
    }

    #[tokio::test]
    async fn test_tool_handler_failure_is_non_fatal() {
        let mut router = ToolRouter::new();
        let failing: ToolHandler = Arc::new(|_, _| {
            Box::pin(async move { anyhow::bail!("backend unreachable") })
        });
        router.register("lookup", failing);
        let model = ScriptedModel::new(vec![
            tool_use(vec![call("lookup", json!({"query": "x"}))], 10),
            end_turn("recovered", 10),
        ]);
        let executor = executor(model, router);
        let result = executor
            .execute(&definition(vec![lookup_tool(false)]), json!(null), None, None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        let report = result.agentic_execution.unwrap();
        let record = &report.trace[0].tool_calls[0];
        assert!(!record.success);
        assert!(record.error.as_ref().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_approval_granted_invokes_and_records() {
        let model = ScriptedModel::new(vec![
            tool_use(vec![call("lookup", json!({"query": "x"}))], 10),
            end_turn("done", 10),
        ]);
        let executor = executor(model, router_with_lookup());
        let gate = executor.approval_gate();
        let context = ExecutionContext::new()
            .with_execution_id("exec-approval-test".to_string().into());
        let approver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.approve_tool_call(
                &"exec-approval-test".to_string().into(),
                "lookup",
                ApprovalResponse {
                    granted: true,
                    approved_by: Some("ops@example.com".to_string()),
                },
            )
        });
        let result = executor
            .execute(
                &definition(vec![lookup_tool(true)]),
                json!(null),
                None,
                Some(context),
            )
            .await
            .unwrap();
        assert!(approver.await.unwrap());
        let report = result.agentic_execution.unwrap();
        let record = &report.trace[0].tool_calls[0];
        assert!(record.success);
        let approval = record.approval.as_ref().unwrap();
        assert!(approval.required && approval.granted);
        assert_eq!(approval.approved_by.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_approval_denied_skips_invocation() {
        let model = ScriptedModel::new(vec![
            tool_use(vec![call("lookup", json!({"query": "x"}))], 10),
            end_turn("done", 10),
        ]);
        let executor = executor(model, router_with_lookup());
        let gate = executor.approval_gate();
        let context = ExecutionContext::new()
            .with_execution_id("exec-denied".to_string().into());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.approve_tool_call(
                &"exec-denied".to_string().into(),
                "lookup",
                ApprovalResponse {
                    granted: false,
                    approved_by: None,
                },
            );
        });
        let result = executor
            .execute(
                &definition(vec![lookup_tool(true)]),
                json!(null),
                None,
                Some(context),
            )
            .await
            .unwrap();
        let report = result.agentic_execution.unwrap();
        let record = &report.trace[0].tool_calls[0];
        assert!(!record.success);
        assert_eq!(
            record.approval,
            Some(common::types::ApprovalRecord {
                required: true,
                granted: false,
                approved_by: None,
            })
        );
        assert!(!report.tools_used.contains("lookup"));
    }

    #[tokio::test]
    async fn test_approval_timeout_skips_invocation() {
        let model = ScriptedModel::new(vec![
            tool_use(vec![call("lookup", json!({"query": "x"}))], 10),
            end_turn("done", 10),
        ]);
        let executor = executor(model, router_with_lookup())
            .with_approval_timeout(Duration::from_millis(30));
        let result = executor
            .execute(&definition(vec![lookup_tool(true)]), json!(null), None, None)
            .await
            .unwrap();
        let report = result.agentic_execution.unwrap();
        let record = &report.trace[0].tool_calls[0];
        assert!(!record.success);
        assert!(record.error.as_ref().unwrap().contains("timed out"));
        assert_eq!(record.approval.as_ref().map(|a| a.granted), Some(false));
    }

    #[tokio::test]
    async fn test_pre_tripped_abort_makes_zero_model_calls() {
        let model = ScriptedModel::new(vec![end_turn("never", 10)]);
        let executor = executor(model.clone(), router_with_lookup());
        let signal = AbortSignal::new();
        signal.abort();
        let result = executor
            .execute(
                &definition(vec![]),
                json!(null),
                None,
                Some(ExecutionContext::new().with_abort(signal)),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_wall_clock_timeout() {
        struct StuckModel;
        #[async_trait::async_trait]
        impl ModelClient for StuckModel {
            async fn complete(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("the executor should have timed out")
            }
        }
        let executor =
            AgenticExecutor::new(TestRuntime::new(), Arc::new(StuckModel), ToolRouter::new());
        let config = InvocationConfig {
            timeout: Some(TimeoutSpec::Millis(50)),
            ..Default::default()
        };
        let result = executor
            .execute(&definition(vec![]), json!(null), Some(&config), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.error.unwrap().name, "TimeoutError");
    }

    #[tokio::test]
    async fn test_model_failure_fails_the_execution() {
        let model = ScriptedModel::new(vec![]);
        let executor = executor(model, router_with_lookup());
        let result = executor
            .execute(&definition(vec![]), json!(null), None, None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.unwrap().name, "TransportError");
    }

    #[tokio::test]
    async fn test_memory_toggle_controls_history() {
        let responses: Vec<ModelResponse> = vec![
            tool_use(vec![call("lookup", json!({"query": "a"}))], 10),
            tool_use(vec![call("lookup", json!({"query": "b"}))], 10),
            end_turn("done", 10),
        ];
        let model = ScriptedModel::new(responses.clone());
        let executor_with_memory = executor(model.clone(), router_with_lookup());
        executor_with_memory
            .execute(&definition(vec![lookup_tool(false)]), json!(null), None, None)
            .await
            .unwrap();
        let with_memory_len = model.requests.lock()[2].messages.len();

        let model = ScriptedModel::new(responses);
        let executor_without = executor(model.clone(), router_with_lookup());
        let mut def = definition(vec![lookup_tool(false)]);
        if let FunctionSpec::Agentic(agentic) = &mut def.spec {
            agentic.enable_memory = false;
        }
        executor_without.execute(&def, json!(null), None, None).await.unwrap();
        let without_memory_len = model.requests.lock()[2].messages.len();
        // With memory the third request carries both earlier rounds; without
        // it carries only the goal and the latest round.
        assert!(with_memory_len > without_memory_len);
    }

    #[tokio::test]
    async fn test_reasoning_summary_only_when_enabled() {
        let mut response = end_turn("done", 10);
        response.reasoning = Some("thought about it".to_string());
        let model = ScriptedModel::new(vec![response.clone()]);
        let executor_plain = executor(model, router_with_lookup());
        let result = executor_plain
            .execute(&definition(vec![]), json!(null), None, None)
            .await
            .unwrap();
        assert_eq!(result.agentic_execution.unwrap().reasoning_summary, None);

        let model = ScriptedModel::new(vec![response]);
        let executor_reasoning = executor(model, router_with_lookup());
        let mut def = definition(vec![]);
        if let FunctionSpec::Agentic(agentic) = &mut def.spec {
            agentic.enable_reasoning = true;
        }
        let result = executor_reasoning.execute(&def, json!(null), None, None).await.unwrap();
        assert_eq!(
            result.agentic_execution.unwrap().reasoning_summary.as_deref(),
            Some("thought about it")
        );
    }

    #[tokio::test]
    async fn test_cost_estimate_with_pricing() {
        let model = ScriptedModel::new(vec![end_turn("done", 1000)]);
        let executor = executor(model, router_with_lookup()).with_pricing(TokenPricing {
            input_token_price_per_1k: 0.01,
            output_token_price_per_1k: 0.02,
        });
        let result = executor
            .execute(&definition(vec![]), json!(null), None, None)
            .await
            .unwrap();
        let estimate = result.agentic_execution.unwrap().cost_estimate.unwrap();
        assert_eq!(estimate.input_tokens, 500);
        assert_eq!(estimate.output_tokens, 500);
        assert!((estimate.estimated_cost - (0.005 + 0.01)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_execute_tool_without_handler_is_a_clear_error() {
        let model = ScriptedModel::new(vec![]);
        let executor = executor(model, ToolRouter::new());
        let err = executor
            .execute_tool(
                &lookup_tool(false),
                json!({"query": "x"}),
                &"exec-x".to_string().into(),
            )
            .await
            .unwrap_err();
        use errors::ErrorMetadataAnyhowExt;
        assert!(err.is_not_found());
        assert!(err.msg().contains("handler"));
    }

    #[tokio::test]
    async fn test_model_override_from_config() {
        let model = ScriptedModel::new(vec![end_turn("done", 10)]);
        let executor = executor(model.clone(), router_with_lookup());
        let config = InvocationConfig {
            model: Some("haiku-3".to_string()),
            ..Default::default()
        };
        let result = executor
            .execute(&definition(vec![]), json!(null), Some(&config), None)
            .await
            .unwrap();
        assert_eq!(result.agentic_execution.unwrap().model, "haiku-3");
        assert_eq!(model.requests.lock()[0].model, "haiku-3");
    }
}
