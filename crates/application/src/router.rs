//! The HTTP surface of a front-end.
//!
//! Routing is deliberately not axum path-template based: function ids may
//! carry a namespace segment, and the id can also arrive via the
//! `X-Function-Id` header, so every request runs through
//! [`common::http::route_function_request`].

use std::sync::Arc;

use axum::{
    body::{
        to_bytes,
        Body,
    },
    response::Response,
    Router,
};
use common::{
    http::{
        error_response,
        json_response,
        route_function_request,
        FunctionRoute,
        RouteAction,
    },
    runtime::Runtime,
    types::{
        FunctionId,
        FunctionSpec,
        InvocationConfig,
    },
};
use errors::ErrorMetadataAnyhowExt;
use http::{
    Method,
    Request,
    StatusCode,
};
use rate_limiter::http::too_many_requests_response;
use serde_json::{
    json,
    Value as JsonValue,
};

use crate::dispatcher::{
    Dispatcher,
    InvokeOutcome,
};

const MAX_BODY_BYTES: usize = 8 << 20;

pub fn router<RT: Runtime>(dispatcher: Arc<Dispatcher<RT>>) -> Router {
    Router::new().fallback(move |request: Request<Body>| {
        let dispatcher = dispatcher.clone();
        async move { handle(dispatcher, request).await }
    })
}

async fn handle<RT: Runtime>(
    dispatcher: Arc<Dispatcher<RT>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let route = route_function_request(parts.uri.path(), &parts.headers);
    let FunctionRoute {
        function_id: Some(function_id),
        action: Some(action),
    } = route
    else {
        return error_response("not found", StatusCode::NOT_FOUND);
    };

    match action {
        RouteAction::Invoke if parts.method == Method::POST => {
            let Ok(bytes) = to_bytes(body, MAX_BODY_BYTES).await else {
                return error_response("request body too large", StatusCode::PAYLOAD_TOO_LARGE);
            };
            let input: JsonValue = if bytes.is_empty() {
                JsonValue::Null
            } else {
                match serde_json::from_slice(&bytes) {
                    Ok(input) => input,
                    Err(e) => {
                        return error_response(
                            &format!("invalid JSON body: {e}"),
                            StatusCode::BAD_REQUEST,
                        )
                    },
                }
            };
            let config: Option<InvocationConfig> = None;
            match dispatcher
                .invoke(&function_id, input, &parts.headers, config.as_ref(), None)
                .await
            {
                Ok(InvokeOutcome::Executed(result)) => json_response(&result, StatusCode::OK),
                Ok(InvokeOutcome::RateLimited(admission)) => {
                    let Some(decision) = admission.blocking_decision() else {
                        return error_response(
                            "Too Many Requests",
                            StatusCode::TOO_MANY_REQUESTS,
                        );
                    };
                    too_many_requests_response(decision, dispatcher.now_ms())
                },
                Err(e) => error_response(&e.user_facing_message(), e.http_status()),
            }
        },
        RouteAction::Info if parts.method == Method::GET => info(&dispatcher, &function_id),
        _ => error_response("method not allowed", StatusCode::METHOD_NOT_ALLOWED),
    }
}

/// The public subset of a definition.
fn info<RT: Runtime>(dispatcher: &Arc<Dispatcher<RT>>, function_id: &str) -> Response {
    let parsed = match FunctionId::parse(function_id) {
        Ok(parsed) => parsed,
        Err(e) => return error_response(&e.user_facing_message(), e.http_status()),
    };
    let Some(definition) = dispatcher.registry().get(&parsed) else {
        return error_response(
            &format!("no function registered under {parsed}"),
            StatusCode::NOT_FOUND,
        );
    };
    let details = match &definition.spec {
        FunctionSpec::Code(code_fn) => json!({
            "id": definition.id,
            "version": definition.version,
            "kind": "code",
            "language": code_fn.language,
        }),
        FunctionSpec::Agentic(agentic) => json!({
            "id": definition.id,
            "version": definition.version,
            "kind": "agentic",
            "model": agentic.model,
            "tools": agentic.tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
        }),
    };
    json_response(&details, StatusCode::OK)
}
