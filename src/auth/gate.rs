//! Per-request authentication gate
//!
//! Every protected request passes through [`AuthGate::evaluate`] exactly once
//! and ends either admitted with a [`SecurityContext`] or rejected with a 401.
//! Failures inside the gate never surface as server errors; the caller only
//! ever learns that it must (re-)authenticate.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::cluster::{ClusterTrust, InboundRequest};
use super::context::SecurityContext;
use super::token::TokenManager;

/// Rejection message when a token fails verification
pub const TOKEN_INVALID_MSG: &str = "token invalid, please re-authenticate";

/// Rejection message when no credentials were presented
pub const NOT_AUTHENTICATED_MSG: &str = "not authenticated";

/// Outcome of evaluating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// A context was already attached; nothing was re-evaluated
    Reentrant,

    /// Admitted with a fresh context
    Passed(SecurityContext),

    /// Refused
    Rejected(Rejection),
}

/// 401 response with a `{"code":401,"msg":...}` body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub msg: &'static str,
}

impl Rejection {
    pub fn token_invalid() -> Self {
        Self {
            msg: TOKEN_INVALID_MSG,
        }
    }

    pub fn not_authenticated() -> Self {
        Self {
            msg: NOT_AUTHENTICATED_MSG,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = json!({
            "code": StatusCode::UNAUTHORIZED.as_u16(),
            "msg": self.msg,
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Authentication gate
pub struct AuthGate {
    tokens: Arc<TokenManager>,
    cluster: Arc<dyn ClusterTrust>,
}

impl AuthGate {
    pub fn new(tokens: Arc<TokenManager>, cluster: Arc<dyn ClusterTrust>) -> Self {
        Self { tokens, cluster }
    }

    /// Decide whether a request may proceed
    ///
    /// With a bearer token the gate first asks the cluster delegate whether a
    /// peer vouches for the request, then verifies the token locally. Without
    /// one it accepts only a valid peer credential.
    pub fn evaluate(
        &self,
        request: &InboundRequest,
        attached: Option<&SecurityContext>,
    ) -> GateDecision {
        if attached.is_some() {
            return GateDecision::Reentrant;
        }

        match request.bearer_token.as_deref() {
            Some(token) => self.evaluate_token(token, request.cluster_host.as_deref()),
            None => self.evaluate_peer(request),
        }
    }

    fn evaluate_token(&self, token: &str, cluster_host: Option<&str>) -> GateDecision {
        if let Some(host) = cluster_host {
            match self.cluster.cluster_auth(token, host) {
                Ok(true) => {
                    tracing::debug!(cluster_host = host, "Request admitted by cluster delegation");
                    return GateDecision::Passed(SecurityContext::peer());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(cluster_host = host, error = %e, "Cluster delegation check failed");
                    return GateDecision::Rejected(Rejection::token_invalid());
                }
            }
        }

        match self.tokens.verify(token) {
            Ok(identity) => {
                tracing::debug!(username = %identity.username, "Request admitted by token");
                GateDecision::Passed(SecurityContext::user(identity.username, identity.roles))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token verification failed");
                GateDecision::Rejected(Rejection::token_invalid())
            }
        }
    }

    fn evaluate_peer(&self, request: &InboundRequest) -> GateDecision {
        match self.cluster.auth_cluster_token(request) {
            Ok(true) => {
                tracing::debug!("Request admitted as peer call");
                GateDecision::Passed(SecurityContext::peer())
            }
            Ok(false) => {
                tracing::debug!("Request carries no credentials");
                GateDecision::Rejected(Rejection::not_authenticated())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Peer credential check failed");
                GateDecision::Rejected(Rejection::not_authenticated())
            }
        }
    }
}
