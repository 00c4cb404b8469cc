use std::borrow::Cow;

use http::StatusCode;
use serde::{
    Deserialize,
    Serialize,
};

/// ErrorMetadata can be attached to an anyhow error chain via
/// `.context(e /*ErrorMetadata*/)`. It is a generic object used across the
/// codebase to tag errors with the information needed to classify them.
///
/// The msg is conveyed as the user facing error message if it makes it to
/// the client.
///
/// The short_msg is used as a tag - available for tests and for metrics
/// logging - so assertions and dashboards are resilient to changes in copy.
/// Eg `InvalidFunctionId`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error code associated with this ErrorMetadata
    pub code: ErrorCode,
    /// short ScreamingCamelCase. Usable in tests for string matching
    /// w/ a standard test helper. Eg InvalidFunctionId
    pub short_msg: Cow<'static, str>,
    /// human readable - developer facing. Should be longer and descriptive.
    /// Eg "Function id contains a path traversal segment"
    pub msg: Cow<'static, str>,
}

#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Unauthenticated,

    RateLimited,
    MemoryExceeded,
    CpuExceeded,
    TokenBudgetExceeded,

    Timeout,
    Cancelled,
    Transport,
    Sandbox,
}

impl ErrorMetadata {
    /// Validation failure (invalid function id, invalid tool input, malformed
    /// traceparent, invalid URL, unsupported language). Maps to 400 in HTTP.
    /// Never retryable.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Required resource missing (storage miss on a required key,
    /// unregistered tool, missing registry entry). Maps to 404 in HTTP.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Not authenticated. Only external collaborators decide auth; the core
    /// merely carries the classification. Maps to 401 in HTTP.
    pub fn unauthenticated(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unauthenticated,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A fixed-window rate limit rejected the request. Maps to 429 in HTTP.
    pub fn rate_limited(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::RateLimited,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Sandbox memory budget exhausted. The msg must satisfy the
    /// `/memory|limit|exceeded/i` contract callers match on.
    pub fn memory_exceeded(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::MemoryExceeded,
            short_msg: "MemoryLimitExceeded".into(),
            msg: msg.into(),
        }
    }

    /// Sandbox CPU budget exhausted. The msg must satisfy the
    /// `/cpu|limit|exceeded/i` contract callers match on.
    pub fn cpu_exceeded(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::CpuExceeded,
            short_msg: "CpuLimitExceeded".into(),
            msg: msg.into(),
        }
    }

    /// Agentic token budget exhausted. The msg must contain the substring
    /// "budget".
    pub fn token_budget_exceeded(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::TokenBudgetExceeded,
            short_msg: "TokenBudgetExceeded".into(),
            msg: msg.into(),
        }
    }

    /// Wall-clock limit reached. Retryable.
    pub fn timeout(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Timeout,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// External abort signal tripped before or during execution.
    pub fn cancelled(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Cancelled,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Storage I/O, HTTP fetch, or model client failure. Retryable by
    /// default.
    pub fn transport(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Transport,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// An error thrown inside user code. The inner stack is preserved by the
    /// executor; this classification never retries.
    pub fn sandbox(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Sandbox,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == ErrorCode::RateLimited
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    pub fn is_limit(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::RateLimited
                | ErrorCode::MemoryExceeded
                | ErrorCode::CpuExceeded
                | ErrorCode::TokenBudgetExceeded
        )
    }

    /// Whether a caller may retry the failed operation unchanged and expect
    /// it to eventually succeed.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Return true if this error is deterministically caused by the user's
    /// request. Such errors are safe to surface verbatim and to cache.
    pub fn is_deterministic_user_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::BadRequest
                | ErrorCode::NotFound
                | ErrorCode::Unauthenticated
                | ErrorCode::Sandbox
        )
    }
}

impl ErrorCode {
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            // HTTP has the unfortunate naming of 401 as unauthorized when
            // it's really about authentication.
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            // Resource-budget violations are the user program's fault.
            ErrorCode::MemoryExceeded
            | ErrorCode::CpuExceeded
            | ErrorCode::TokenBudgetExceeded
            | ErrorCode::Sandbox => StatusCode::BAD_REQUEST,
            ErrorCode::Timeout | ErrorCode::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::Transport => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorCode::Timeout | ErrorCode::Transport | ErrorCode::RateLimited => true,
            ErrorCode::BadRequest
            | ErrorCode::NotFound
            | ErrorCode::Unauthenticated
            | ErrorCode::MemoryExceeded
            | ErrorCode::CpuExceeded
            | ErrorCode::TokenBudgetExceeded
            | ErrorCode::Cancelled
            | ErrorCode::Sandbox => false,
        }
    }

    /// The error-kind name carried on the wire, eg `ValidationError`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "ValidationError",
            ErrorCode::NotFound => "NotFoundError",
            ErrorCode::Unauthenticated => "AuthError",
            ErrorCode::RateLimited
            | ErrorCode::MemoryExceeded
            | ErrorCode::CpuExceeded
            | ErrorCode::TokenBudgetExceeded => "LimitError",
            ErrorCode::Timeout => "TimeoutError",
            ErrorCode::Cancelled => "CancelledError",
            ErrorCode::Transport => "TransportError",
            ErrorCode::Sandbox => "SandboxError",
        }
    }
}

/// The wire shape of a classified error:
/// `{name, message, code?, stack?, retryable?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl StructuredError {
    pub fn from_metadata(em: &ErrorMetadata) -> Self {
        Self {
            name: em.code.kind_name().to_string(),
            message: em.msg.to_string(),
            code: Some(em.short_msg.to_string()),
            stack: None,
            retryable: Some(em.is_retryable()),
        }
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_rate_limited(&self) -> bool;
    fn is_timeout(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    fn is_limit(&self) -> bool;
    fn is_retryable(&self) -> bool;
    fn is_deterministic_user_error(&self) -> bool;
    fn user_facing_message(&self) -> String;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn http_status(&self) -> StatusCode;
    fn structured(&self) -> StructuredError;
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self;
    fn wrap_error_message<F>(self, f: F) -> Self
    where
        F: FnOnce(String) -> String;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_bad_request(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_bad_request();
        }
        false
    }

    fn is_not_found(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_not_found();
        }
        false
    }

    fn is_rate_limited(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_rate_limited();
        }
        false
    }

    fn is_timeout(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_timeout();
        }
        false
    }

    fn is_cancelled(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_cancelled();
        }
        false
    }

    fn is_limit(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_limit();
        }
        false
    }

    /// Unclassified errors default to non-retryable: retrying an unknown
    /// failure is how retry storms start.
    fn is_retryable(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_retryable();
        }
        false
    }

    fn is_deterministic_user_error(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_deterministic_user_error();
        }
        false
    }

    fn user_facing_message(&self) -> String {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.to_string();
        }
        INTERNAL_SERVER_ERROR_MSG.to_string()
    }

    /// Return the short_msg associated with this Error
    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        INTERNAL_SERVER_ERROR
    }

    /// Return the descriptive msg associated with this Error
    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        INTERNAL_SERVER_ERROR_MSG
    }

    fn http_status(&self) -> StatusCode {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.code.http_status_code();
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn structured(&self) -> StructuredError {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return StructuredError::from_metadata(e);
        }
        StructuredError {
            name: "InternalError".to_string(),
            message: INTERNAL_SERVER_ERROR_MSG.to_string(),
            code: None,
            stack: None,
            retryable: None,
        }
    }

    fn map_error_metadata<F>(self, f: F) -> Self
    where
        F: FnOnce(ErrorMetadata) -> ErrorMetadata,
    {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>().cloned() {
            return self.context(f(e));
        }
        self
    }

    /// Wrap the underlying error message, maintaining the underlying error
    /// classification if it exists.
    fn wrap_error_message<F>(self, f: F) -> Self
    where
        F: FnOnce(String) -> String,
    {
        if let Some(mut em) = self.downcast_ref::<ErrorMetadata>().cloned() {
            em.msg = f(em.msg.to_string()).into();
            return self.context(em);
        }
        let new_msg = f(self.to_string());
        self.context(new_msg)
    }
}

pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";
pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::{
        ErrorCode,
        ErrorMetadata,
        ErrorMetadataAnyhowExt,
        StructuredError,
    };

    fn metadata_for(code: ErrorCode) -> ErrorMetadata {
        match code {
            ErrorCode::BadRequest => ErrorMetadata::bad_request("Bad", "bad request"),
            ErrorCode::NotFound => ErrorMetadata::not_found("Missing", "not found"),
            ErrorCode::Unauthenticated => ErrorMetadata::unauthenticated("NoAuth", "no auth"),
            ErrorCode::RateLimited => ErrorMetadata::rate_limited("TooMany", "too many requests"),
            ErrorCode::MemoryExceeded => ErrorMetadata::memory_exceeded("memory limit exceeded"),
            ErrorCode::CpuExceeded => ErrorMetadata::cpu_exceeded("cpu limit exceeded"),
            ErrorCode::TokenBudgetExceeded => {
                ErrorMetadata::token_budget_exceeded("token budget exceeded")
            },
            ErrorCode::Timeout => ErrorMetadata::timeout("Timeout", "deadline reached"),
            ErrorCode::Cancelled => ErrorMetadata::cancelled("Cancelled", "aborted"),
            ErrorCode::Transport => ErrorMetadata::transport("Transport", "connection reset"),
            ErrorCode::Sandbox => ErrorMetadata::sandbox("UserError", "thrown in user code"),
        }
    }

    #[test]
    fn test_classification_survives_anyhow_context() {
        let err: anyhow::Error = anyhow::anyhow!("inner")
            .context(ErrorMetadata::not_found("FunctionNotFound", "no such function"));
        assert!(err.is_not_found());
        assert_eq!(err.short_msg(), "FunctionNotFound");
        assert_eq!(err.http_status(), http::StatusCode::NOT_FOUND);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unclassified_error_is_internal() {
        let err = anyhow::anyhow!("sqlx: connection refused");
        assert!(!err.is_bad_request());
        assert_eq!(err.short_msg(), crate::INTERNAL_SERVER_ERROR);
        assert_eq!(err.http_status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        let structured = err.structured();
        assert_eq!(structured.name, "InternalError");
        // Raw error text must not leak into the user-facing shape.
        assert!(!structured.message.contains("sqlx"));
    }

    #[test]
    fn test_wrap_error_message_keeps_classification() {
        let err: anyhow::Error =
            anyhow::anyhow!("miss").context(ErrorMetadata::not_found("CodeNotFound", "no code"));
        let wrapped = err.wrap_error_message(|m| format!("while resolving source: {m}"));
        assert!(wrapped.is_not_found());
        assert!(wrapped.msg().starts_with("while resolving source:"));
    }

    proptest! {
        #![proptest_config(
            ProptestConfig { failure_persistence: None, ..ProptestConfig::default() }
        )]

        #[test]
        fn proptest_wire_shape_consistency(code in any::<ErrorCode>()) {
            let em = metadata_for(code);
            let structured = StructuredError::from_metadata(&em);
            assert_eq!(structured.name, code.kind_name());
            assert_eq!(structured.retryable, Some(code.is_retryable()));
            assert_eq!(structured.message, em.msg);
            // Limit errors all share the LimitError kind but keep a
            // distinguishing short code.
            if em.is_limit() {
                assert_eq!(structured.name, "LimitError");
                assert!(structured.code.is_some());
            }
        }

        #[test]
        fn proptest_deterministic_user_errors_never_retry(code in any::<ErrorCode>()) {
            let em = metadata_for(code);
            // Identical input fails identically; retrying is pointless.
            if em.is_deterministic_user_error() {
                assert!(!em.is_retryable());
            }
        }
    }
}
