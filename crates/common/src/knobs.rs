//! Tunable limits and parameters for front-ends.
//!
//! Every knob here should have a comment explaining what it's for and the
//! upper/lower bounds if applicable so an oncall engineer can adjust these
//! safely for a deployment if needed.
//!
//! All knobs can be overridden with an environment variable of the same
//! name.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use crate::env::env_config;

/// Default wall-clock timeout for one code execution. This is how long user
/// code may run before the sandbox is torn down.
pub static CODE_EXECUTION_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("CODE_EXECUTION_TIMEOUT_MS", 5_000)));

/// Default wall-clock timeout for one agentic execution, covering all
/// iterations, tool calls, and approval waits.
pub static AGENTIC_EXECUTION_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("AGENTIC_EXECUTION_TIMEOUT_MS", 300_000)));

/// Default iteration bound for the agentic loop when the definition does not
/// set one.
pub static AGENTIC_MAX_ITERATIONS: LazyLock<u32> =
    LazyLock::new(|| env_config("AGENTIC_MAX_ITERATIONS", 10));

/// Default per-iteration tool-call cap for the agentic loop.
pub static AGENTIC_MAX_TOOL_CALLS_PER_ITERATION: LazyLock<u32> =
    LazyLock::new(|| env_config("AGENTIC_MAX_TOOL_CALLS_PER_ITERATION", 5));

/// Maximum number of compiled artifacts held by the compile cache. Bounded
/// so a tenant uploading many distinct modules cannot exhaust front-end
/// memory.
pub static COMPILE_CACHE_MAX_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("COMPILE_CACHE_MAX_SIZE", 100));

/// Optional age bound for compile-cache entries, in milliseconds. Zero
/// disables the TTL.
pub static COMPILE_CACHE_TTL_MS: LazyLock<u64> =
    LazyLock::new(|| env_config("COMPILE_CACHE_TTL_MS", 0));

/// Per-IP fixed window width.
pub static RATE_LIMIT_IP_WINDOW: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("RATE_LIMIT_IP_WINDOW_MS", 60_000)));

/// Per-IP request budget within one window.
pub static RATE_LIMIT_IP_MAX_REQUESTS: LazyLock<u64> =
    LazyLock::new(|| env_config("RATE_LIMIT_IP_MAX_REQUESTS", 100));

/// Per-function fixed window width.
pub static RATE_LIMIT_FUNCTION_WINDOW: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("RATE_LIMIT_FUNCTION_WINDOW_MS", 60_000)));

/// Per-function request budget within one window.
pub static RATE_LIMIT_FUNCTION_MAX_REQUESTS: LazyLock<u64> =
    LazyLock::new(|| env_config("RATE_LIMIT_FUNCTION_MAX_REQUESTS", 1_000));

/// Span batch size for the OpenTelemetry exporter.
pub static TRACE_EXPORT_BATCH_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("TRACE_EXPORT_BATCH_SIZE", 100));

/// Default sampling rate for root spans, in [0, 1].
pub static TRACE_SAMPLE_RATE: LazyLock<f64> =
    LazyLock::new(|| env_config("TRACE_SAMPLE_RATE", 1.0));

/// Service name stamped on every exported trace resource.
pub static TRACE_SERVICE_NAME: LazyLock<String> =
    LazyLock::new(|| env_config("TRACE_SERVICE_NAME", "lattice-backend".to_string()));
