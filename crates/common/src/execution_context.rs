use std::{
    fmt::{
        Display,
        Formatter,
    },
    str::FromStr,
    time::Duration,
};

use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::cancellation::AbortSignal;

/// Identifies one front-end request. A request may fan out into several
/// executions (eg an agentic function invoking code functions as tools).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        let bytes = rand::rng().random::<[u8; 8]>();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.0
    }
}

impl FromStr for RequestId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RequestId(s.to_owned()))
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unique ID per execution. There is a 1-1 relationship between one
/// function execution and its ExecutionId.
///
/// Execution ids are not meant to be human readable, but they must be
/// globally unique. Generated ids carry the `exec-` prefix; caller-supplied
/// ids are taken verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(format!("exec-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::generate()
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-invocation context threaded through the executors: identity for log
/// correlation, the external abort signal, and an optional timeout override.
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    pub request_id: Option<RequestId>,
    pub execution_id: Option<ExecutionId>,
    pub abort: Option<AbortSignal>,
    pub timeout_override: Option<Duration>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_id(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(AbortSignal::is_aborted)
    }
}
