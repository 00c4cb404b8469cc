//! HTTP helpers shared by the front-end surface: JSON response builders,
//! client IP extraction for rate-limit categorization, and the routing rules
//! that map request paths onto function ids and actions.

use axum::{
    body::Body,
    response::Response,
};
use http::{
    header::CONTENT_TYPE,
    HeaderMap,
    StatusCode,
};
use serde::Serialize;
use serde_json::json;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
pub const FUNCTION_ID_HEADER: &str = "x-function-id";

pub const APPLICATION_JSON: &str = "application/json";

/// Serialize `data` as the response body with `Content-Type:
/// application/json`.
pub fn json_response<T: Serialize>(data: &T, status: StatusCode) -> Response {
    let body = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, APPLICATION_JSON)
        .body(Body::from(body))
        .expect("statically valid response")
}

/// The `{error: msg}` JSON error body.
pub fn error_response(msg: &str, status: StatusCode) -> Response {
    json_response(&json!({ "error": msg }), status)
}

/// Extract the client IP for rate-limit categorization. Proxy headers are
/// consulted most-specific first; a request with none of them maps onto the
/// shared `"unknown"` bucket.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(ip) = header_str(headers, "cf-connecting-ip") {
        return ip.to_string();
    }
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(ip) = header_str(headers, "x-real-ip") {
        return ip.to_string();
    }
    "unknown".to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteAction {
    Invoke,
    Info,
}

/// The outcome of routing one request path: the function id (from the path,
/// falling back to the `X-Function-Id` header) and the recognized action, if
/// any.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionRoute {
    pub function_id: Option<String>,
    pub action: Option<RouteAction>,
}

/// Map a request path onto a function id and action.
///
/// `/functions/<fid>` names a function; `/invoke` and `/info` (the latter
/// case-insensitive) are the recognized trailing actions. Query parameters
/// never participate. The header is the fallback id source; the path wins
/// when both are present.
pub fn route_function_request(path: &str, headers: &HeaderMap) -> FunctionRoute {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let header_id = header_str(headers, FUNCTION_ID_HEADER).map(str::to_string);

    let Some(rest) = path.strip_prefix("/functions/") else {
        return FunctionRoute {
            function_id: header_id,
            action: None,
        };
    };
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let Some(fid) = segments.next() else {
        return FunctionRoute {
            function_id: header_id,
            action: None,
        };
    };
    // A namespaced id occupies two path segments; the action, if any, is
    // whatever follows.
    let mut fid = fid.to_string();
    let mut next = segments.next();
    if let Some(second) = next {
        let is_action = second.eq_ignore_ascii_case("invoke") || second.eq_ignore_ascii_case("info");
        if !is_action {
            fid = format!("{fid}/{second}");
            next = segments.next();
        }
    }
    let action = match next {
        Some(s) if s.eq_ignore_ascii_case("invoke") => Some(RouteAction::Invoke),
        Some(s) if s.eq_ignore_ascii_case("info") => Some(RouteAction::Info),
        Some(_) => None,
        None => None,
    };
    // Anything after the action segment makes the subpath unrecognized.
    let action = if segments.next().is_some() { None } else { action };
    FunctionRoute {
        function_id: Some(fid),
        action,
    }
}
