//! W3C Trace Context propagation.
//!
//! `traceparent` grammar: `00-<32hex>-<16hex>-<2hex>`. Only version `00` is
//! accepted on extraction; anything else (including the reserved `ff`,
//! uppercase hex, or malformed lengths) extracts to `None`. `tracestate` is
//! carried verbatim in both directions.

use http::{
    HeaderMap,
    HeaderValue,
};

use crate::{
    context::TraceContext,
    ids::{
        SPAN_ID_HEX_LEN,
        TRACE_ID_HEX_LEN,
    },
};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

const SAMPLED_FLAG: u8 = 0x01;

/// Render a context into its `traceparent` value.
pub fn format_traceparent(context: &TraceContext) -> String {
    let flags = if context.sampled { "01" } else { "00" };
    format!("00-{}-{}-{flags}", context.trace_id, context.span_id)
}

/// Write `traceparent` (and `tracestate`, when present) onto a header map.
pub fn inject(context: &TraceContext, headers: &mut HeaderMap) {
    if let Ok(value) = HeaderValue::from_str(&format_traceparent(context)) {
        headers.insert(TRACEPARENT_HEADER, value);
    }
    if let Some(state) = &context.trace_state {
        if let Ok(value) = HeaderValue::from_str(state) {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
}

/// Parse one `traceparent` value. Rejects return `None`: a malformed
/// header extracts the same as an absent one.
pub fn parse_traceparent(value: &str) -> Option<TraceContext> {
    let mut parts = value.split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    // Only header version 00 is understood; ff is reserved as invalid.
    if version != "00" {
        return None;
    }
    if !is_lower_hex(trace_id, TRACE_ID_HEX_LEN) || trace_id.bytes().all(|b| b == b'0') {
        return None;
    }
    if !is_lower_hex(span_id, SPAN_ID_HEX_LEN) || span_id.bytes().all(|b| b == b'0') {
        return None;
    }
    if !is_lower_hex(flags, 2) {
        return None;
    }
    let flags = u8::from_str_radix(flags, 16).ok()?;
    Some(TraceContext {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        parent_span_id: None,
        sampled: flags & SAMPLED_FLAG != 0,
        trace_state: None,
    })
}

/// Extract a context from incoming headers, attaching `tracestate`
/// verbatim when present.
pub fn extract(headers: &HeaderMap) -> Option<TraceContext> {
    let traceparent = headers.get(TRACEPARENT_HEADER)?.to_str().ok()?;
    let mut context = parse_traceparent(traceparent)?;
    if let Some(state) = headers.get(TRACESTATE_HEADER).and_then(|v| v.to_str().ok()) {
        context.trace_state = Some(state.to_string());
    }
    Some(context)
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
