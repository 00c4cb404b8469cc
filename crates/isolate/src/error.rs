//! Errors thrown by user code inside a sandbox.
//!
//! These are data, not control flow: the executor catches them and folds
//! them into the failed execution result, preserving the inner stack frames
//! the user needs to debug their own code.

use errors::StructuredError;
use serde_json::Value as JsonValue;

/// A structured error surfaced from user code. `name` is the thrown error's
/// class (`TypeError`, `ReferenceError`, or a custom name); non-error
/// throws are stringified into `message` with a generic name.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("{name}: {message}")]
pub struct UserCodeError {
    pub name: String,
    pub message: String,
    /// The stack as observed in the user's source, inner frames included.
    pub stack: Option<String>,
    pub code: Option<String>,
    /// A partial output attached by user code that failed midway. Surfaced
    /// as `result.output` on the failed result when `retryable` is set.
    pub partial_result: Option<JsonValue>,
    pub retryable: bool,
}

impl UserCodeError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            code: None,
            partial_result: None,
            retryable: false,
        }
    }

    /// Stringify a non-error thrown value.
    pub fn from_thrown_value(value: &JsonValue) -> Self {
        let message = match value {
            JsonValue::String(s) => s.clone(),
            // Serialization of a thrown object can contain cycles upstream;
            // by the time it is a JsonValue it is already acyclic, and any
            // shape is printable.
            other => other.to_string(),
        };
        Self::new("Error", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_partial_result(mut self, partial: JsonValue) -> Self {
        self.partial_result = Some(partial);
        self.retryable = true;
        self
    }

    pub fn structured(&self) -> StructuredError {
        StructuredError {
            name: self.name.clone(),
            message: self.message.clone(),
            code: self.code.clone(),
            stack: self.stack.clone(),
            retryable: Some(self.retryable),
        }
    }
}
