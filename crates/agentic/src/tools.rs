//! Tool resolution and execution.
//!
//! `ToolImplementation` is a sum type with one resolver per variant:
//! builtins and deploy-time-compiled inline handlers resolve from the
//! registry, function tools go through the platform's function invoker, and
//! api tools POST to their endpoint behind the URL guard. A tool whose
//! implementation does not resolve is hidden from the model entirely.

use std::{
    collections::HashMap,
    sync::Arc,
};

use async_trait::async_trait;
use common::{
    execution_context::ExecutionId,
    types::{
        FunctionId,
        ToolDefinition,
        ToolImplementation,
    },
    url_guard::validate_outbound_url,
};
use errors::ErrorMetadata;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;

/// What a handler sees besides its input.
#[derive(Clone)]
pub struct ToolContext {
    pub execution_id: ExecutionId,
    pub tool: Arc<ToolDefinition>,
}

pub type ToolHandler =
    Arc<dyn Fn(JsonValue, ToolContext) -> BoxFuture<'static, anyhow::Result<JsonValue>> + Send + Sync>;

/// Invokes another registered function on behalf of a function-backed tool.
/// Implemented by the application dispatcher.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_id: &FunctionId, input: JsonValue) -> anyhow::Result<JsonValue>;
}

/// Routes tool definitions onto executable handlers.
#[derive(Clone, Default)]
pub struct ToolRouter {
    handlers: HashMap<String, ToolHandler>,
    invoker: Option<Arc<dyn FunctionInvoker>>,
    http: reqwest::Client,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Register a named handler. Builtin tools resolve by their builtin
    /// tag; inline tools are compiled at deploy time and registered under
    /// the tool's own name.
    pub fn register(&mut self, name: impl Into<String>, handler: ToolHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Resolve a definition to a handler. `None` hides the tool from the
    /// model.
    pub fn resolve(&self, definition: &ToolDefinition) -> Option<ToolHandler> {
        match &definition.implementation {
            ToolImplementation::Builtin { name } => self.handlers.get(name).cloned(),
            ToolImplementation::Inline { .. } => self.handlers.get(&definition.name).cloned(),
            ToolImplementation::Function { function_id } => {
                let invoker = self.invoker.clone()?;
                let function_id = function_id.clone();
                Some(Arc::new(move |input, _ctx| {
                    let invoker = invoker.clone();
                    let function_id = function_id.clone();
                    Box::pin(async move { invoker.invoke(&function_id, input).await })
                }))
            },
            ToolImplementation::Api { endpoint } => {
                let endpoint = endpoint.clone();
                let client = self.http.clone();
                Some(Arc::new(move |input, _ctx| {
                    let endpoint = endpoint.clone();
                    let client = client.clone();
                    Box::pin(async move {
                        let decision = validate_outbound_url(endpoint.as_str());
                        if !decision.allowed {
                            anyhow::bail!(ErrorMetadata::bad_request(
                                "UnsafeToolEndpoint",
                                decision
                                    .reason
                                    .unwrap_or_else(|| "refused by the url guard".to_string()),
                            ));
                        }
                        let response = client
                            .post(endpoint.clone())
                            .json(&input)
                            .send()
                            .await
                            .and_then(reqwest::Response::error_for_status)
                            .map_err(|e| {
                                anyhow::anyhow!(e).context(ErrorMetadata::transport(
                                    "ToolEndpointFailed",
                                    format!("api tool call to {endpoint} failed"),
                                ))
                            })?;
                        Ok(response.json().await.map_err(|e| {
                            anyhow::anyhow!(e).context(ErrorMetadata::transport(
                                "ToolEndpointFailed",
                                format!("api tool response from {endpoint} was not JSON"),
                            ))
                        })?)
                    })
                }))
            },
        }
    }
}

/// Validate a tool input against the tool's JSON-Schema shape.
pub fn validate_tool_input(definition: &ToolDefinition, input: &JsonValue) -> Result<(), String> {
    if jsonschema::is_valid(&definition.input_schema, input) {
        Ok(())
    } else {
        Err(format!(
            "validation failed for tool {:?}: input does not match the declared schema",
            definition.name
        ))
    }
}
