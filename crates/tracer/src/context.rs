use serde::{
    Deserialize,
    Serialize,
};

/// A propagated trace context: enough to parent a remote span and carry the
/// sampling decision across process boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub sampled: bool,
    /// Opaque vendor list, carried verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
}
