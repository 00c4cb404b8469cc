//! The isolate backend seam.
//!
//! Engine embeddings (a V8 runtime, a WASM engine, a managed worker loader)
//! implement [`IsolateBackend`] and are registered per isolate kind at
//! process init, the same way compilers and model clients are collaborators
//! behind interfaces. The executor owns every cross-cutting guarantee
//! (budgets, determinism, timeout, cancellation, network policy); backends
//! only run the artifact.

use std::{
    collections::HashMap,
    sync::Arc,
};

use async_trait::async_trait;
use errors::ErrorMetadata;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;

use crate::{
    environment::SandboxEnvironment,
    executor::{
        Artifact,
        CompiledArtifact,
    },
};

pub struct IsolateRequest {
    pub artifact: Arc<CompiledArtifact>,
    pub input: JsonValue,
    pub env: Arc<SandboxEnvironment>,
}

#[async_trait]
pub trait IsolateBackend: Send + Sync {
    async fn run(&self, request: IsolateRequest) -> anyhow::Result<JsonValue>;
}

/// An entry handler hosted in-process. The handler receives the invocation
/// input and the sandbox environment; anything it does with clocks,
/// randomness, budgets, or fetch goes through the environment.
pub type NativeHandler = Arc<
    dyn Fn(JsonValue, Arc<SandboxEnvironment>) -> BoxFuture<'static, anyhow::Result<JsonValue>>
        + Send
        + Sync,
>;

/// The in-process backend: artifacts resolve to registered host handlers.
/// Source artifacts resolve by their (trimmed) text, WASM artifacts by the
/// hex of their content hash. Builtin platform functions and the test suite
/// run on this backend.
#[derive(Clone, Default)]
pub struct NativeBackend {
    handlers: HashMap<String, NativeHandler>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, handler: NativeHandler) {
        self.handlers.insert(key.into(), handler);
    }

    fn resolve(&self, artifact: &CompiledArtifact) -> anyhow::Result<&NativeHandler> {
        let key = artifact.handler_key();
        self.handlers.get(&key).ok_or_else(|| {
            anyhow::anyhow!(ErrorMetadata::not_found(
                "HandlerNotRegistered",
                format!("no native handler registered for artifact {key:?}"),
            ))
        })
    }
}

#[async_trait]
impl IsolateBackend for NativeBackend {
    async fn run(&self, request: IsolateRequest) -> anyhow::Result<JsonValue> {
        let handler = self.resolve(&request.artifact)?;
        handler(request.input, request.env).await
    }
}

impl CompiledArtifact {
    /// The key a native backend resolves this artifact by.
    pub fn handler_key(&self) -> String {
        match &self.artifact {
            Artifact::Source { text } => text.trim().to_string(),
            Artifact::Wasm { bytes } => common::sha256::Sha256::hash(bytes).as_hex(),
        }
    }
}
