//! Inter-node trust
//!
//! Nodes of a cluster share one secret. A node that has authenticated an
//! end-user mints a short-lived *delegation* credential addressed to the peer
//! it forwards the request to; a node calling a peer on its own behalf mints a
//! *peer* credential. Both are `base64url(json claims) "." base64url(mac)` with
//! an HMAC-SHA256 over the encoded claims.
//!
//! Verification only reads the request, the configuration and the clock, so it
//! can never wait on the node it is authorizing.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::http::{HeaderMap, Uri};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::ClusterError;

type HmacSha256 = Hmac<Sha256>;

/// Standard bearer token header
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Bearer scheme prefix
pub const BEARER_PREFIX: &str = "Bearer ";

/// Query parameter carrying the token for clients that cannot set headers
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Header naming the node a forwarded request was authenticated on
pub const ACCESS_CLUSTER_HOST_HEADER: &str = "access-cluster-host";

/// Header carrying a peer credential
pub const CLUSTER_TOKEN_HEADER: &str = "x-cluster-token";

/// Default credential lifetime
pub const DEFAULT_CREDENTIAL_TTL_SECS: u64 = 60;

/// What the gate reads from an inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    /// Bearer token, if any
    pub bearer_token: Option<String>,

    /// Node the caller claims to have been authenticated on
    pub cluster_host: Option<String>,

    /// Peer credential, if any
    pub cluster_token: Option<String>,
}

impl InboundRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_cluster_host(mut self, host: impl Into<String>) -> Self {
        self.cluster_host = Some(host.into());
        self
    }

    pub fn with_cluster_token(mut self, token: impl Into<String>) -> Self {
        self.cluster_token = Some(token.into());
        self
    }

    /// Extract the request fields from HTTP headers and the query string
    ///
    /// The `Authorization: Bearer` header wins over the `token` query
    /// parameter. Blank values count as absent.
    pub fn from_parts(headers: &HeaderMap, uri: &Uri) -> Self {
        let bearer_token = header_str(headers, AUTHORIZATION_HEADER)
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| query_param(uri, TOKEN_QUERY_PARAM));

        Self {
            bearer_token,
            cluster_host: header_str(headers, ACCESS_CLUSTER_HOST_HEADER).map(str::to_string),
            cluster_token: header_str(headers, CLUSTER_TOKEN_HEADER).map(str::to_string),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Checks a node performs on credentials minted by its peers
#[cfg_attr(test, mockall::automock)]
pub trait ClusterTrust: Send + Sync {
    /// True iff `token` is a delegation credential minted by `target_host`
    /// authorizing this node to serve the current request
    fn cluster_auth(&self, token: &str, target_host: &str) -> Result<bool, ClusterError>;

    /// True iff the request carries a valid peer credential
    fn auth_cluster_token(&self, request: &InboundRequest) -> Result<bool, ClusterError>;
}

/// Kind of cluster credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Minted on behalf of an end-user authenticated on the issuing node
    Delegation,

    /// Minted by a node for its own calls
    Peer,
}

/// Claims carried by a cluster credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterClaims {
    pub kind: CredentialKind,

    /// Issuing node
    pub iss: String,

    /// Addressed node
    pub aud: String,

    /// End-user the issuer authenticated (delegation only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Cluster trust backed by a secret shared by every node
pub struct SharedSecretTrust {
    node_host: String,
    peers: BTreeSet<String>,
    secret: Option<Vec<u8>>,
    ttl: Duration,
}

impl SharedSecretTrust {
    pub fn new(
        node_host: impl Into<String>,
        peers: impl IntoIterator<Item = String>,
        secret: Option<&str>,
        ttl: Duration,
    ) -> Self {
        let secret = secret
            .filter(|s| !s.is_empty())
            .map(|s| s.as_bytes().to_vec());

        if secret.is_none() {
            tracing::info!("No cluster secret configured, inter-node trust is disabled");
        }

        Self {
            node_host: node_host.into(),
            peers: peers.into_iter().collect(),
            secret,
            ttl,
        }
    }

    /// This node's host identifier
    pub fn node_host(&self) -> &str {
        &self.node_host
    }

    /// Mint a delegation credential for `aud` vouching for `subject`
    pub fn issue_delegation(&self, aud: &str, subject: &str) -> Result<String, ClusterError> {
        self.sign(&ClusterClaims {
            kind: CredentialKind::Delegation,
            iss: self.node_host.clone(),
            aud: aud.to_string(),
            sub: Some(subject.to_string()),
            exp: self.expiry(),
        })
    }

    /// Mint a peer credential for `aud`
    pub fn issue_peer_credential(&self, aud: &str) -> Result<String, ClusterError> {
        self.sign(&ClusterClaims {
            kind: CredentialKind::Peer,
            iss: self.node_host.clone(),
            aud: aud.to_string(),
            sub: None,
            exp: self.expiry(),
        })
    }

    fn expiry(&self) -> i64 {
        Utc::now().timestamp() + self.ttl.as_secs() as i64
    }

    fn mac(&self) -> Result<HmacSha256, ClusterError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| ClusterError::Signing("no cluster secret configured".to_string()))?;

        HmacSha256::new_from_slice(secret).map_err(|e| ClusterError::Signing(e.to_string()))
    }

    fn sign(&self, claims: &ClusterClaims) -> Result<String, ClusterError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| ClusterError::Signing(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", payload, signature))
    }

    /// Decode a credential and check its MAC, audience and expiry
    ///
    /// Returns `Ok(None)` when the credential is well-formed but not valid for
    /// this node.
    fn verify(&self, credential: &str) -> Result<Option<ClusterClaims>, ClusterError> {
        if self.secret.is_none() {
            return Ok(None);
        }

        let (payload, signature) = credential
            .split_once('.')
            .ok_or_else(|| ClusterError::Malformed("missing separator".to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| ClusterError::Malformed(e.to_string()))?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            return Ok(None);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| ClusterError::Malformed(e.to_string()))?;
        let claims: ClusterClaims = serde_json::from_slice(&payload)
            .map_err(|e| ClusterError::Malformed(e.to_string()))?;

        if claims.aud != self.node_host || claims.exp <= Utc::now().timestamp() {
            return Ok(None);
        }

        Ok(Some(claims))
    }

    fn is_peer(&self, host: &str) -> bool {
        host != self.node_host && self.peers.contains(host)
    }
}

impl ClusterTrust for SharedSecretTrust {
    fn cluster_auth(&self, token: &str, target_host: &str) -> Result<bool, ClusterError> {
        if !self.is_peer(target_host) {
            return Ok(false);
        }

        // Delegation credentials have exactly one separator
        if token.matches('.').count() != 1 {
            return Ok(false);
        }

        Ok(self.verify(token)?.is_some_and(|claims| {
            claims.kind == CredentialKind::Delegation && claims.iss == target_host
        }))
    }

    fn auth_cluster_token(&self, request: &InboundRequest) -> Result<bool, ClusterError> {
        let Some(credential) = request.cluster_token.as_deref() else {
            return Ok(false);
        };

        Ok(self.verify(credential)?.is_some_and(|claims| {
            claims.kind == CredentialKind::Peer && self.is_peer(&claims.iss)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "cluster-secret";

    fn node(host: &str, secret: Option<&str>) -> SharedSecretTrust {
        let peers = ["node-a:9899", "node-b:9899", "node-c:9899"]
            .into_iter()
            .map(str::to_string);
        SharedSecretTrust::new(host, peers, secret, Duration::from_secs(60))
    }

    fn expired_credential(issuer: &SharedSecretTrust, kind: CredentialKind, aud: &str) -> String {
        issuer
            .sign(&ClusterClaims {
                kind,
                iss: issuer.node_host.clone(),
                aud: aud.to_string(),
                sub: None,
                exp: Utc::now().timestamp() - 1,
            })
            .unwrap()
    }

    // Test 1: delegation minted by A for B passes on B with target A
    #[test]
    fn test_delegation_accepted() {
        let a = node("node-a:9899", Some(SECRET));
        let b = node("node-b:9899", Some(SECRET));

        let token = a.issue_delegation("node-b:9899", "alice").unwrap();
        assert!(b.cluster_auth(&token, "node-a:9899").unwrap());
    }

    // Test 2: delegation fails with a different target host
    #[test]
    fn test_delegation_wrong_target() {
        let a = node("node-a:9899", Some(SECRET));
        let b = node("node-b:9899", Some(SECRET));

        let token = a.issue_delegation("node-b:9899", "alice").unwrap();
        assert!(!b.cluster_auth(&token, "node-c:9899").unwrap());
        assert!(!b.cluster_auth(&token, "unknown:1").unwrap());
    }

    // Test 3: delegation fails on a node it was not addressed to
    #[test]
    fn test_delegation_wrong_audience() {
        let a = node("node-a:9899", Some(SECRET));
        let c = node("node-c:9899", Some(SECRET));

        let token = a.issue_delegation("node-b:9899", "alice").unwrap();
        assert!(!c.cluster_auth(&token, "node-a:9899").unwrap());
    }

    // Test 4: delegation fails under a different secret
    #[test]
    fn test_delegation_wrong_secret() {
        let a = node("node-a:9899", Some("other-secret"));
        let b = node("node-b:9899", Some(SECRET));

        let token = a.issue_delegation("node-b:9899", "alice").unwrap();
        assert!(!b.cluster_auth(&token, "node-a:9899").unwrap());
    }

    // Test 5: target host equal to self is never a delegation source
    #[test]
    fn test_delegation_from_self_rejected() {
        let b = node("node-b:9899", Some(SECRET));
        let token = b.issue_delegation("node-b:9899", "alice").unwrap();
        assert!(!b.cluster_auth(&token, "node-b:9899").unwrap());
    }

    // Test 6: peer credential is not accepted as delegation and vice versa
    #[test]
    fn test_kinds_not_interchangeable() {
        let a = node("node-a:9899", Some(SECRET));
        let b = node("node-b:9899", Some(SECRET));

        let peer = a.issue_peer_credential("node-b:9899").unwrap();
        assert!(!b.cluster_auth(&peer, "node-a:9899").unwrap());

        let delegation = a.issue_delegation("node-b:9899", "alice").unwrap();
        let request = InboundRequest::new().with_cluster_token(delegation);
        assert!(!b.auth_cluster_token(&request).unwrap());
    }

    // Test 7: peer credential passes auth_cluster_token
    #[test]
    fn test_peer_credential_accepted() {
        let a = node("node-a:9899", Some(SECRET));
        let b = node("node-b:9899", Some(SECRET));

        let request =
            InboundRequest::new().with_cluster_token(a.issue_peer_credential("node-b:9899").unwrap());
        assert!(b.auth_cluster_token(&request).unwrap());
        assert!(!b.auth_cluster_token(&InboundRequest::new()).unwrap());
    }

    // Test 8: expired credentials fail
    #[test]
    fn test_expired_credentials() {
        let a = node("node-a:9899", Some(SECRET));
        let b = node("node-b:9899", Some(SECRET));

        let delegation = expired_credential(&a, CredentialKind::Delegation, "node-b:9899");
        assert!(!b.cluster_auth(&delegation, "node-a:9899").unwrap());

        let peer = expired_credential(&a, CredentialKind::Peer, "node-b:9899");
        let request = InboundRequest::new().with_cluster_token(peer);
        assert!(!b.auth_cluster_token(&request).unwrap());
    }

    // Test 9: no secret disables both checks and minting
    #[test]
    fn test_no_secret() {
        let a = node("node-a:9899", Some(SECRET));
        let b = node("node-b:9899", None);

        let token = a.issue_delegation("node-b:9899", "alice").unwrap();
        assert!(!b.cluster_auth(&token, "node-a:9899").unwrap());

        let request =
            InboundRequest::new().with_cluster_token(a.issue_peer_credential("node-b:9899").unwrap());
        assert!(!b.auth_cluster_token(&request).unwrap());

        assert!(matches!(
            b.issue_peer_credential("node-a:9899"),
            Err(ClusterError::Signing(_))
        ));
    }

    // Test 10: a JWT is simply not a delegation credential
    #[test]
    fn test_jwt_is_not_delegation() {
        let b = node("node-b:9899", Some(SECRET));
        assert!(!b.cluster_auth("aaa.bbb.ccc", "node-a:9899").unwrap());
    }

    // Test 11: malformed peer credential is an error
    #[test]
    fn test_malformed_peer_credential() {
        let b = node("node-b:9899", Some(SECRET));
        let request = InboundRequest::new().with_cluster_token("no-separator");
        assert!(matches!(
            b.auth_cluster_token(&request),
            Err(ClusterError::Malformed(_))
        ));
    }

    // Test 12: InboundRequest extraction from headers
    #[test]
    fn test_inbound_request_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        headers.insert("access-cluster-host", "node-a:9899".parse().unwrap());
        headers.insert("x-cluster-token", "p.s".parse().unwrap());
        let uri: Uri = "/api/users?token=ignored".parse().unwrap();

        let request = InboundRequest::from_parts(&headers, &uri);
        assert_eq!(request.bearer_token.as_deref(), Some("abc.def.ghi"));
        assert_eq!(request.cluster_host.as_deref(), Some("node-a:9899"));
        assert_eq!(request.cluster_token.as_deref(), Some("p.s"));
    }

    // Test 13: query parameter fallback and blank values
    #[test]
    fn test_inbound_request_query_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer   ".parse().unwrap());
        let uri: Uri = "/ws?a=1&token=xyz".parse().unwrap();

        let request = InboundRequest::from_parts(&headers, &uri);
        assert_eq!(request.bearer_token.as_deref(), Some("xyz"));
        assert!(request.cluster_host.is_none());

        let request = InboundRequest::from_parts(&HeaderMap::new(), &"/ws?token=".parse().unwrap());
        assert!(request.bearer_token.is_none());
    }
}
