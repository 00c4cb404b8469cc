//! The HTTP surface of a rate-limit rejection.

use axum::response::Response;
use common::http::json_response;
use http::StatusCode;
use serde_json::json;

use crate::shard::Decision;

/// Build the 429 response for a rejected request: `Retry-After` in whole
/// seconds (rounded up), the remaining/reset headers, and the JSON body
/// clients key off.
pub fn too_many_requests_response(decision: &Decision, now_ms: u64) -> Response {
    let retry_after_secs = decision.reset_at.saturating_sub(now_ms).div_ceil(1000);
    let body = json!({
        "error": "Too Many Requests",
        "message": format!("Rate limit exceeded. Retry after {retry_after_secs}s."),
        "retryAfter": retry_after_secs,
        "resetAt": decision.reset_at,
    });
    let mut response = json_response(&body, StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers_mut();
    headers.insert("Retry-After", retry_after_secs.into());
    headers.insert("X-RateLimit-Remaining", 0.into());
    headers.insert("X-RateLimit-Reset", decision.reset_at.into());
    response
}
