//! Span lifecycle. A span records only while it is sampled and unended;
//! everything else is a cheap no-op so unsampled traffic costs almost
//! nothing.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

use common::runtime::{
    Runtime,
    UnixTimestamp,
};
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};

use crate::export::ExportedSpan;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: SpanStatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A scalar or array attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Array(Vec<AttributeValue>),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// A recorded exception: the structured record plus the mirrored
/// `exception.*` attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionRecord {
    #[serde(rename = "type")]
    pub exception_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

#[derive(Debug)]
struct SpanState {
    name: String,
    kind: SpanKind,
    start: UnixTimestamp,
    end: Option<UnixTimestamp>,
    status: SpanStatus,
    attributes: Attributes,
    exceptions: Vec<ExceptionRecord>,
    links: Vec<SpanLink>,
}

/// Invoked exactly once, at the first `end()` of a sampled span.
pub(crate) type OnEnd = Box<dyn FnOnce(ExportedSpan) + Send>;

pub struct Span<RT: Runtime> {
    runtime: RT,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    sampled: bool,
    ended: AtomicBool,
    state: Mutex<SpanState>,
    on_end: Mutex<Option<OnEnd>>,
}

impl<RT: Runtime> Span<RT> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        runtime: RT,
        trace_id: String,
        span_id: String,
        parent_span_id: Option<String>,
        sampled: bool,
        name: String,
        kind: SpanKind,
        start: UnixTimestamp,
        attributes: Attributes,
        links: Vec<SpanLink>,
        on_end: Option<OnEnd>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            trace_id,
            span_id,
            parent_span_id,
            sampled,
            ended: AtomicBool::new(false),
            state: Mutex::new(SpanState {
                name,
                kind,
                start,
                end: None,
                status: SpanStatus::default(),
                attributes,
                exceptions: Vec::new(),
                links,
            }),
            on_end: Mutex::new(on_end),
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// A span records iff it is sampled and not yet ended.
    pub fn is_recording(&self) -> bool {
        self.sampled && !self.is_ended()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if !self.is_recording() {
            return;
        }
        self.state.lock().attributes.insert(key.into(), value.into());
    }

    pub fn set_attributes(&self, attributes: Attributes) {
        if !self.is_recording() {
            return;
        }
        self.state.lock().attributes.extend(attributes);
    }

    pub fn set_status(&self, code: SpanStatusCode, message: Option<String>) {
        if !self.is_recording() {
            return;
        }
        self.state.lock().status = SpanStatus { code, message };
    }

    /// Append an exception record and mirror it into the `exception.*`
    /// attributes. `extra` attributes merge over the mirrored ones.
    pub fn record_exception(&self, exception: ExceptionRecord, extra: Option<Attributes>) {
        if !self.is_recording() {
            return;
        }
        let mut state = self.state.lock();
        state
            .attributes
            .insert("exception.type".to_string(), exception.exception_type.clone().into());
        state
            .attributes
            .insert("exception.message".to_string(), exception.message.clone().into());
        if let Some(stack) = &exception.stacktrace {
            state
                .attributes
                .insert("exception.stacktrace".to_string(), stack.clone().into());
        }
        if let Some(extra) = extra {
            state.attributes.extend(extra);
        }
        state.exceptions.push(exception);
    }

    /// A copy of the recorded exceptions; mutating it does not touch the
    /// span.
    pub fn get_exceptions(&self) -> Vec<ExceptionRecord> {
        self.state.lock().exceptions.clone()
    }

    /// A copy of the links.
    pub fn get_links(&self) -> Vec<SpanLink> {
        self.state.lock().links.clone()
    }

    pub fn get_attribute(&self, key: &str) -> Option<AttributeValue> {
        self.state.lock().attributes.get(key).cloned()
    }

    /// Elapsed time: end − start when ended, now − start otherwise.
    pub fn duration(&self) -> Duration {
        let state = self.state.lock();
        let end = match state.end {
            Some(end) => end,
            None => self.runtime.unix_timestamp(),
        };
        end.checked_sub(state.start).unwrap_or(Duration::ZERO)
    }

    /// End the span. Idempotent: only the first call sets the end time and
    /// hands the span to the tracer for export.
    pub fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let snapshot = {
            let mut state = self.state.lock();
            state.end = Some(self.runtime.unix_timestamp());
            self.snapshot_locked(&state)
        };
        if let Some(on_end) = self.on_end.lock().take() {
            if self.sampled {
                on_end(snapshot);
            }
        }
    }

    /// Snapshot the span in its exported shape.
    pub fn snapshot(&self) -> ExportedSpan {
        let state = self.state.lock();
        self.snapshot_locked(&state)
    }

    fn snapshot_locked(&self, state: &SpanState) -> ExportedSpan {
        ExportedSpan {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            name: state.name.clone(),
            kind: state.kind,
            start_time_unix_nano: state.start.as_nanos() as u64,
            end_time_unix_nano: state.end.map(|t| t.as_nanos() as u64),
            attributes: state.attributes.clone(),
            status: state.status.clone(),
            links: state.links.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::runtime::testing::TestRuntime;
    use pretty_assertions::assert_eq;

    use super::*;

    fn span(rt: &TestRuntime, sampled: bool) -> Arc<Span<TestRuntime>> {
        Span::new(
            rt.clone(),
            "a".repeat(32),
            "b".repeat(16),
            None,
            sampled,
            "test".to_string(),
            SpanKind::Internal,
            rt.unix_timestamp(),
            Attributes::new(),
            Vec::new(),
            None,
        )
    }

    #[test]
    fn test_recording_invariant() {
        let rt = TestRuntime::new();
        let sampled = span(&rt, true);
        assert!(sampled.is_recording());
        sampled.end();
        assert!(!sampled.is_recording());

        let unsampled = span(&rt, false);
        assert!(!unsampled.is_recording());
    }

    #[test]
    fn test_unsampled_span_drops_mutations() {
        let rt = TestRuntime::new();
        let span = span(&rt, false);
        span.set_attribute("k", "v");
        span.set_status(SpanStatusCode::Error, Some("boom".to_string()));
        span.record_exception(
            ExceptionRecord {
                exception_type: "TypeError".to_string(),
                message: "x".to_string(),
                stacktrace: None,
            },
            None,
        );
        assert_eq!(span.get_attribute("k"), None);
        assert!(span.get_exceptions().is_empty());
        assert_eq!(span.snapshot().status, SpanStatus::default());
    }

    #[test]
    fn test_ended_span_drops_mutations() {
        let rt = TestRuntime::new();
        let span = span(&rt, true);
        span.end();
        span.set_attribute("late", "v");
        assert_eq!(span.get_attribute("late"), None);
    }

    #[test]
    fn test_record_exception_mirrors_attributes() {
        let rt = TestRuntime::new();
        let span = span(&rt, true);
        span.record_exception(
            ExceptionRecord {
                exception_type: "ReferenceError".to_string(),
                message: "x is not defined".to_string(),
                stacktrace: Some("at handler (index.js:3:1)".to_string()),
            },
            Some(Attributes::from([(
                "faas.retry".to_string(),
                AttributeValue::Bool(false),
            )])),
        );
        assert_eq!(
            span.get_attribute("exception.type"),
            Some("ReferenceError".into())
        );
        assert_eq!(
            span.get_attribute("exception.message"),
            Some("x is not defined".into())
        );
        assert_eq!(
            span.get_attribute("exception.stacktrace"),
            Some("at handler (index.js:3:1)".into())
        );
        assert_eq!(span.get_attribute("faas.retry"), Some(AttributeValue::Bool(false)));
        assert_eq!(span.get_exceptions().len(), 1);
    }

    #[test]
    fn test_get_exceptions_returns_a_copy() {
        let rt = TestRuntime::new();
        let span = span(&rt, true);
        span.record_exception(
            ExceptionRecord {
                exception_type: "E".to_string(),
                message: "m".to_string(),
                stacktrace: None,
            },
            None,
        );
        let mut copy = span.get_exceptions();
        copy.clear();
        assert_eq!(span.get_exceptions().len(), 1);
    }

    #[test]
    fn test_duration_uses_clock_until_ended() {
        let rt = TestRuntime::new();
        let span = span(&rt, true);
        rt.advance(Duration::from_millis(250));
        assert_eq!(span.duration(), Duration::from_millis(250));
        span.end();
        rt.advance(Duration::from_secs(60));
        assert_eq!(span.duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_end_is_idempotent() {
        let rt = TestRuntime::new();
        let span = span(&rt, true);
        span.end();
        let first_end = span.snapshot().end_time_unix_nano;
        rt.advance(Duration::from_secs(5));
        span.end();
        assert_eq!(span.snapshot().end_time_unix_nano, first_end);
    }
}
