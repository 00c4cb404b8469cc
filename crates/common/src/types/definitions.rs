use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;
use url::Url;

use super::functions::{
    CodeSource,
    FunctionId,
    FunctionVersion,
    IsolateKind,
    Language,
};
use crate::{
    duration::parse_duration,
    knobs,
};

/// A registered function: identity plus a kind-specific definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: FunctionId,
    pub version: FunctionVersion,
    #[serde(flatten)]
    pub spec: FunctionSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FunctionSpec {
    Code(CodeFunction),
    Agentic(AgenticFunction),
}

impl FunctionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            FunctionSpec::Code(_) => "code",
            FunctionSpec::Agentic(_) => "agentic",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFunction {
    pub language: Language,
    pub source: CodeSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<InvocationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,
}

fn default_max_iterations() -> u32 {
    *knobs::AGENTIC_MAX_ITERATIONS
}

fn default_max_tool_calls() -> u32 {
    *knobs::AGENTIC_MAX_TOOL_CALLS_PER_ITERATION
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticFunction {
    pub system_prompt: String,
    pub goal: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub enable_memory: bool,
    #[serde(default)]
    pub enable_reasoning: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<JsonValue>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: JsonValue,
    pub implementation: ToolImplementation,
    #[serde(default)]
    pub requires_approval: bool,
}

/// How a tool is realized. A sum type with one resolver per variant; no
/// inheritance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ToolImplementation {
    /// A handler shipped with the platform, looked up by tag.
    Builtin { name: String },
    /// Handler code carried in the definition itself.
    Inline { handler: String },
    /// Another registered function acts as the handler.
    Function { function_id: FunctionId },
    /// An HTTPS endpoint invoked per call. The endpoint passes the URL
    /// guard before every request.
    Api { endpoint: Url },
}

/// Sandbox policy for one code function. Everything is optional; the
/// defaults are an ordinary, nondeterministic, network-less sandbox.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPolicy {
    #[serde(default)]
    pub deterministic: bool,
    /// Seed for deterministic mode. Ignored unless `deterministic` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_time_limit_ms: Option<u64>,
    /// When present, only these global names are visible inside the
    /// sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_globals: Option<Vec<String>>,
    #[serde(default)]
    pub network_enabled: bool,
    /// Exact host matches. Only consulted when `network_enabled` is set.
    #[serde(default)]
    pub network_allowlist: Vec<String>,
    /// Force a specific isolate family regardless of language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolate: Option<IsolateKind>,
}

/// A timeout in function configuration: either integer milliseconds or a
/// human-written string like `"500ms"` or `"5s"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSpec {
    Millis(u64),
    Text(String),
}

impl TimeoutSpec {
    pub fn as_duration(&self) -> anyhow::Result<Duration> {
        match self {
            TimeoutSpec::Millis(ms) => Ok(Duration::from_millis(*ms)),
            TimeoutSpec::Text(s) => parse_duration(s),
        }
    }
}

/// Per-invocation configuration overlay. Resolution order is invocation >
/// definition default > system defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolate: Option<IsolateKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,
}

impl InvocationConfig {
    /// Overlay `self` (the invocation config) over a definition default.
    /// Fields set at invocation time win.
    pub fn overlaid_on(&self, base: Option<&InvocationConfig>) -> InvocationConfig {
        let Some(base) = base else {
            return self.clone();
        };
        InvocationConfig {
            timeout: self.timeout.clone().or_else(|| base.timeout.clone()),
            isolate: self.isolate.or(base.isolate),
            model: self.model.clone().or_else(|| base.model.clone()),
            max_iterations: self.max_iterations.or(base.max_iterations),
            token_budget: self.token_budget.or(base.token_budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{
        AgenticFunction,
        InvocationConfig,
        TimeoutSpec,
        ToolImplementation,
    };

    #[test]
    fn test_agentic_defaults() {
        let f: AgenticFunction = serde_json::from_value(serde_json::json!({
            "systemPrompt": "You are a helpful assistant.",
            "goal": "Summarize the report.",
            "model": "sonnet-4",
        }))
        .unwrap();
        assert_eq!(f.max_iterations, 10);
        assert_eq!(f.max_tool_calls_per_iteration, 5);
        assert!(!f.enable_memory);
        assert!(f.tools.is_empty());
    }

    #[test]
    fn test_timeout_spec_accepts_both_shapes() {
        let ms: TimeoutSpec = serde_json::from_value(serde_json::json!(1500)).unwrap();
        assert_eq!(ms.as_duration().unwrap(), Duration::from_millis(1500));
        let text: TimeoutSpec = serde_json::from_value(serde_json::json!("5s")).unwrap();
        assert_eq!(text.as_duration().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_invocation_overlay_prefers_invocation() {
        let base = InvocationConfig {
            timeout: Some(TimeoutSpec::Millis(10_000)),
            model: Some("haiku-3".to_string()),
            max_iterations: Some(3),
            ..Default::default()
        };
        let invocation = InvocationConfig {
            model: Some("sonnet-4".to_string()),
            ..Default::default()
        };
        let resolved = invocation.overlaid_on(Some(&base));
        assert_eq!(resolved.model.as_deref(), Some("sonnet-4"));
        assert_eq!(resolved.timeout, Some(TimeoutSpec::Millis(10_000)));
        assert_eq!(resolved.max_iterations, Some(3));
    }

    #[test]
    fn test_tool_implementation_tagging() {
        let api: ToolImplementation = serde_json::from_value(serde_json::json!({
            "type": "api",
            "endpoint": "https://tools.example.com/lookup",
        }))
        .unwrap();
        assert!(matches!(api, ToolImplementation::Api { .. }));
        let builtin: ToolImplementation = serde_json::from_value(serde_json::json!({
            "type": "builtin",
            "name": "webSearch",
        }))
        .unwrap();
        assert!(matches!(builtin, ToolImplementation::Builtin { .. }));
    }
}
