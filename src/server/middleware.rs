//! HTTP middleware for jarboot-auth
//!
//! This module provides middleware layers for:
//! - The authentication gate on protected routes
//! - Request/response logging
//! - Per-request tracing spans

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthGate, GateDecision, InboundRequest, SecurityContext};

/// Authentication middleware function
///
/// Runs the gate once per request:
/// 1. Extracts bearer token, cluster host and cluster token
/// 2. Leaves an already-authenticated request untouched
/// 3. Attaches the resulting [`SecurityContext`] to the request extensions
/// 4. Answers 401 on rejection without reaching the handler
pub async fn auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    let inbound = InboundRequest::from_parts(request.headers(), request.uri());
    let existing = request.extensions().get::<SecurityContext>();

    match gate.evaluate(&inbound, existing) {
        GateDecision::Reentrant => next.run(request).await,
        GateDecision::Passed(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        GateDecision::Rejected(rejection) => {
            tracing::debug!(path = %request.uri().path(), msg = rejection.msg, "Request rejected");
            rejection.into_response()
        }
    }
}

/// Logging middleware function
///
/// Logs request and response details including:
/// - Method and path
/// - Status code
/// - Response time
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %uri.path(),
        status = %status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}

/// Tracing middleware function
///
/// Wraps the whole request in an `http_request` span and records the status.
/// The query string is left out of the span since it may carry a token.
pub async fn tracing_middleware(request: Request, next: Next) -> Response {
    use tracing::Instrument;

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        http.method = %method,
        http.path = %path,
        http.status_code = tracing::field::Empty,
    );

    async move {
        let response = next.run(request).await;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        response
    }
    .instrument(span)
    .await
}
