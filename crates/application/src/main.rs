//! Front-end entrypoint: wires the invocation plane together over in-memory
//! storage backends and serves the HTTP surface.

use std::{
    net::SocketAddr,
    sync::Arc,
};

use agentic::{
    AgenticExecutor,
    ModelClient,
    ModelRequest,
    ModelResponse,
    StopReason,
    TokenUsage,
    ToolRouter,
};
use application::{
    router,
    Dispatcher,
    DispatcherInvoker,
    FunctionRegistry,
};
use code_storage::{
    CodeStore,
    InMemoryKeyValueStore,
    InMemoryObjectStore,
};
use common::{
    env::env_config,
    runtime::ProdRuntime,
    types::IsolateKind,
};
use isolate::{
    CodeExecutor,
    NativeBackend,
};
use rate_limiter::RateLimiterClient;
use tracer::{
    ConsoleExporter,
    Tracer,
    TracerConfig,
};
use tracing_subscriber::EnvFilter;

/// Placeholder model client until a real provider is wired in. Completes
/// immediately so the agentic path is exercisable end to end.
struct UnconfiguredModel;

#[async_trait::async_trait]
impl ModelClient for UnconfiguredModel {
    async fn complete(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
        Ok(ModelResponse {
            content: "no model client is configured for this deployment".to_string(),
            reasoning: None,
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let runtime = ProdRuntime::new();
    let code_store = CodeStore::new(
        Arc::new(InMemoryKeyValueStore::new()),
        Arc::new(InMemoryObjectStore::new(runtime.clone())),
    );
    let mut code_executor = CodeExecutor::new(runtime.clone(), code_store);
    code_executor.register_backend(IsolateKind::V8, Arc::new(NativeBackend::new()));
    let code_executor = Arc::new(code_executor);

    let registry = FunctionRegistry::new();
    let tools = ToolRouter::new().with_invoker(Arc::new(DispatcherInvoker::new(
        registry.clone(),
        code_executor.clone(),
    )));
    let agentic_executor = Arc::new(AgenticExecutor::new(
        runtime.clone(),
        Arc::new(UnconfiguredModel),
        tools,
    ));
    let tracer = Tracer::new(
        runtime.clone(),
        TracerConfig {
            exporter: Some(Arc::new(ConsoleExporter)),
            ..Default::default()
        },
    );
    let dispatcher = Arc::new(Dispatcher::new(
        runtime.clone(),
        registry,
        RateLimiterClient::with_default_policy(runtime),
        tracer,
        code_executor,
        agentic_executor,
    ));

    let port: u16 = env_config("LATTICE_PORT", 8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(dispatcher)).await?;
    Ok(())
}
