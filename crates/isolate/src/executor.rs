//! The code-execution core: resolve configuration and source, consult the
//! compile cache, prepare an artifact, and run it in a sandbox under the
//! timeout, cancellation, and resource rules.
//!
//! User-code failures never propagate as errors: they fold into a failed
//! [`ExecutionResult`]. Only resolution-phase problems (bad definitions,
//! missing storage entries, unreachable backends) surface to the caller.

use std::{
    collections::HashMap,
    hash::{
        Hash,
        Hasher,
    },
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use code_storage::CodeStore;
use common::{
    execution_context::{
        ExecutionContext,
        ExecutionId,
    },
    knobs,
    runtime::Runtime,
    sha256::Sha256,
    types::{
        CodeFunction,
        CodeSource,
        ExecutionMetadata,
        ExecutionMetrics,
        ExecutionResult,
        ExecutionStatus,
        FunctionDefinition,
        FunctionSpec,
        FunctionVersion,
        InvocationConfig,
        IsolateKind,
        Language,
        SandboxPolicy,
    },
    url_guard::validate_outbound_url,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
    StructuredError,
};
use serde_json::Value as JsonValue;

use crate::{
    backend::{
        IsolateBackend,
        IsolateRequest,
    },
    compile_cache::{
        CacheKey,
        CompileCache,
    },
    environment::SandboxEnvironment,
    error::UserCodeError,
    metrics,
    strip::strip_types,
};

/// A prepared, sandbox-ready artifact.
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    Source { text: String },
    Wasm { bytes: Bytes },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledArtifact {
    pub isolate_kind: IsolateKind,
    pub artifact: Artifact,
}

pub struct CodeExecutor<RT: Runtime> {
    runtime: RT,
    code_store: CodeStore,
    compile_cache: CompileCache<RT>,
    backends: HashMap<IsolateKind, Arc<dyn IsolateBackend>>,
    http: reqwest::Client,
}

impl<RT: Runtime> CodeExecutor<RT> {
    pub fn new(runtime: RT, code_store: CodeStore) -> Self {
        let ttl = match *knobs::COMPILE_CACHE_TTL_MS {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let compile_cache = CompileCache::new(runtime.clone(), *knobs::COMPILE_CACHE_MAX_SIZE, ttl);
        Self {
            runtime,
            code_store,
            compile_cache,
            backends: HashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn register_backend(&mut self, kind: IsolateKind, backend: Arc<dyn IsolateBackend>) {
        self.backends.insert(kind, backend);
    }

    pub fn compile_cache(&self) -> &CompileCache<RT> {
        &self.compile_cache
    }

    pub async fn execute(
        &self,
        definition: &FunctionDefinition,
        input: JsonValue,
        config: Option<&InvocationConfig>,
        context: Option<ExecutionContext>,
    ) -> anyhow::Result<ExecutionResult> {
        let FunctionSpec::Code(code_fn) = &definition.spec else {
            anyhow::bail!(ErrorMetadata::bad_request(
                "NotACodeFunction",
                format!("{} is not a code function", definition.id),
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

        let effective = match config {
            Some(config) => config.overlaid_on(code_fn.default_config.as_ref()),
            None => code_fn
                .default_config
                .clone()
                .unwrap_or_default(),
        };
        let policy = code_fn.sandbox.clone().unwrap_or_default();
        let timeout = self.resolve_timeout(code_fn, &effective, &context)?;

        let mut base_metrics = ExecutionMetrics {
            input_size_bytes: input_size,
            language: Some(code_fn.language),
            deterministic: Some(policy.deterministic),
            retry_count: 0,
            ..Default::default()
        };

        // A signal tripped before the first collaborator call must result
        // in zero collaborator calls.
        if context.is_aborted() {
            base_metrics.duration_ms = ms_since(start);
            return Ok(self.finish(
                definition,
                execution_id,
                started_at,
                ExecutionStatus::Cancelled,
                None,
                Some(cancelled_error()),
                base_metrics,
            ));
        }

        // Resolution phase: failures here propagate to the caller.
        let code = self.resolve_source(definition, code_fn).await?;
        let key = CacheKey {
            language: code_fn.language,
            content_hash: Sha256::hash(&code),
            sandbox_fingerprint: sandbox_fingerprint(&policy),
        };
        let (artifact, cache_hit, compilation_time_ms) = match self.compile_cache.get(&key) {
            Some(artifact) => (artifact, true, 0),
            None => {
                let compile_start = std::time::Instant::now();
                let artifact = Arc::new(prepare_artifact(code_fn.language, &code)?);
                let elapsed = ms_since(compile_start);
                self.compile_cache.insert(key, artifact.clone());
                (artifact, false, elapsed)
            },
        };
        base_metrics.cache_hit = Some(cache_hit);
        if code_fn.language.is_compiled() {
            base_metrics.compilation_time_ms = Some(compilation_time_ms);
        }

        let isolate_kind = policy
            .isolate
            .or(effective.isolate)
            .unwrap_or_else(|| artifact.isolate_kind);
        base_metrics.isolate_type = Some(isolate_kind);
        let backend = self.backends.get(&isolate_kind).ok_or_else(|| {
            anyhow::anyhow!(ErrorMetadata::not_found(
                "IsolateBackendMissing",
                format!("no backend registered for {isolate_kind} isolates"),
            ))
        })?;

        let env = Arc::new(SandboxEnvironment::new(
            &self.runtime,
            &policy,
            &Sha256::hash(&code),
        ));
        let request = IsolateRequest {
            artifact,
            input,
            env: env.clone(),
        };

        let abort = context.abort.clone();
        let aborted = async {
            match &abort {
                Some(signal) => signal.aborted().await,
                None => futures::future::pending::<()>().await,
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = aborted => Outcome::Cancelled,
            _ = self.runtime.wait(timeout) => Outcome::TimedOut,
            result = backend.run(request) => Outcome::Finished(result),
        };

        base_metrics.memory_used_bytes = Some(env.memory_used_bytes());
        base_metrics.cpu_time_ms = Some(env.cpu_time_ms());
        base_metrics.duration_ms = ms_since(start);

        let (status, output, error) = match outcome {
            Outcome::Finished(Ok(output)) => {
                base_metrics.output_size_bytes = json_size(&output);
                (ExecutionStatus::Completed, Some(output), None)
            },
            Outcome::Finished(Err(e)) => {
                let (error, partial) = collect_user_error(e);
                if let Some(partial) = &partial {
                    base_metrics.output_size_bytes = json_size(partial);
                }
                (ExecutionStatus::Failed, partial, Some(error))
            },
            Outcome::TimedOut => {
                tracing::info!(
                    "Execution of {} timed out after {}ms",
                    definition.id,
                    timeout.as_millis()
                );
                let error = StructuredError::from_metadata(&ErrorMetadata::timeout(
                    "ExecutionTimeout",
                    format!("execution exceeded the {}ms timeout", timeout.as_millis()),
                ));
                (ExecutionStatus::Timeout, None, Some(error))
            },
            Outcome::Cancelled => (ExecutionStatus::Cancelled, None, Some(cancelled_error())),
        };
        Ok(self.finish(
            definition,
            execution_id,
            started_at,
            status,
            output,
            error,
            base_metrics,
        ))
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
            agentic_execution: None,
        }
    }

    fn resolve_timeout(
        &self,
        code_fn: &CodeFunction,
        effective: &InvocationConfig,
        context: &ExecutionContext,
    ) -> anyhow::Result<Duration> {
        if let Some(spec) = &effective.timeout {
            return spec.as_duration();
        }
        if let Some(spec) = &code_fn.timeout {
            return spec.as_duration();
        }
        if let Some(override_timeout) = context.timeout_override {
            return Ok(override_timeout);
        }
        Ok(*knobs::CODE_EXECUTION_TIMEOUT)
    }

    /// Resolve the function's source into bytes. WASM-family languages
    /// resolve precompiled binaries through the code store's binary
    /// surface; the platform is not a language compiler.
    async fn resolve_source(
        &self,
        definition: &FunctionDefinition,
        code_fn: &CodeFunction,
    ) -> anyhow::Result<Bytes> {
        if code_fn.language.isolate_kind() == IsolateKind::Wasm {
            return self
                .code_store
                .get_binary(&definition.id, Some(&definition.version))
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!(ErrorMetadata::not_found(
                        "BinaryNotFound",
                        format!(
                            "no compiled artifact stored for {}@{}",
                            definition.id, definition.version
                        ),
                    ))
                });
        }
        match &code_fn.source {
            CodeSource::Inline { code } => Ok(Bytes::from(code.clone())),
            CodeSource::ObjectKey { key } => {
                self.code_store.get_object(key).await?.ok_or_else(|| {
                    anyhow::anyhow!(ErrorMetadata::not_found(
                        "CodeObjectNotFound",
                        format!("no stored object under key {key:?}"),
                    ))
                })
            },
            CodeSource::Https { url } => {
                let decision = validate_outbound_url(url.as_str());
                if !decision.allowed {
                    anyhow::bail!(ErrorMetadata::bad_request(
                        "UnsafeSourceUrl",
                        decision
                            .reason
                            .unwrap_or_else(|| "refused by the url guard".to_string()),
                    ));
                }
                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| {
                        anyhow::anyhow!(e).context(ErrorMetadata::transport(
                            "SourceFetchFailed",
                            format!("failed to fetch source from {url}"),
                        ))
                    })?;
                Ok(response.bytes().await.map_err(|e| {
                    anyhow::anyhow!(e).context(ErrorMetadata::transport(
                        "SourceFetchFailed",
                        format!("failed to read source body from {url}"),
                    ))
                })?)
            },
            CodeSource::Registry {
                function_id,
                version,
            } => {
                let version = version.clone().unwrap_or(FunctionVersion::Latest);
                self.code_store
                    .get(function_id, Some(&version))
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!(ErrorMetadata::not_found(
                            "RegistryEntryNotFound",
                            format!("no code registered for {function_id}@{version}"),
                        ))
                    })
            },
        }
    }
}

enum Outcome {
    Finished(anyhow::Result<JsonValue>),
    TimedOut,
    Cancelled,
}

/// Prepare the sandbox-ready artifact for one language.
fn prepare_artifact(language: Language, code: &Bytes) -> anyhow::Result<CompiledArtifact> {
    let isolate_kind = language.isolate_kind();
    let artifact = match language {
        Language::Typescript => {
            let source = std::str::from_utf8(code).map_err(|_| {
                anyhow::anyhow!(ErrorMetadata::bad_request(
                    "InvalidSourceEncoding",
                    "typescript source must be utf-8",
                ))
            })?;
            Artifact::Source {
                text: strip_types(source),
            }
        },
        Language::Javascript | Language::Python | Language::Csharp => {
            let source = std::str::from_utf8(code).map_err(|_| {
                anyhow::anyhow!(ErrorMetadata::bad_request(
                    "InvalidSourceEncoding",
                    format!("{language} source must be utf-8"),
                ))
            })?;
            Artifact::Source {
                text: source.to_string(),
            }
        },
        Language::Rust | Language::Go | Language::Zig | Language::Assemblyscript => {
            Artifact::Wasm {
                bytes: code.clone(),
            }
        },
    };
    Ok(CompiledArtifact {
        isolate_kind,
        artifact,
    })
}

/// A stable fingerprint of the policy fields that change what the sandbox
/// may observe, so cache entries never leak across policies.
fn sandbox_fingerprint(policy: &SandboxPolicy) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    policy.deterministic.hash(&mut hasher);
    policy.seed.hash(&mut hasher);
    policy.allowed_globals.hash(&mut hasher);
    policy.network_enabled.hash(&mut hasher);
    policy.network_allowlist.hash(&mut hasher);
    hasher.finish()
}

/// Fold a sandbox failure into the structured wire error, extracting any
/// partial output the user code attached.
fn collect_user_error(e: anyhow::Error) -> (StructuredError, Option<JsonValue>) {
    if let Some(user) = e.downcast_ref::<UserCodeError>() {
        let partial = if user.retryable {
            user.partial_result.clone()
        } else {
            None
        };
        return (user.structured(), partial);
    }
    (e.structured(), None)
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
