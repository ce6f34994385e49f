//! Bearer token issuing and verification
//!
//! Tokens are HS256 JWTs carrying the username and role set. A token is
//! self-contained: verification needs only the signing secret and the clock.

use std::collections::BTreeSet;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Default token lifetime (90 days)
pub const DEFAULT_TOKEN_EXPIRE_SECS: u64 = 7_776_000;

/// Length of a generated signing secret in bytes
const GENERATED_SECRET_BYTES: usize = 32;

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username
    pub sub: String,

    /// Role set held at issue time
    #[serde(default)]
    pub roles: Vec<String>,

    /// Issued at (unix seconds)
    pub iat: i64,

    /// Expiry (unix seconds)
    pub exp: i64,
}

/// A freshly issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity recovered from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub roles: BTreeSet<String>,
}

/// Issues and verifies signed bearer tokens
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl TokenManager {
    /// Create a manager from a configured secret
    ///
    /// With no secret (or an empty one) a random secret is generated, and
    /// tokens then stop verifying after a restart.
    pub fn new(secret: Option<&str>, lifetime: Duration) -> Self {
        let secret = match secret.filter(|s| !s.is_empty()) {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                tracing::warn!(
                    "No token secret configured, using a random one; tokens will not survive a restart"
                );
                generate_secret()
            }
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            validation,
            lifetime,
        }
    }

    /// Token lifetime
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a token for `username` holding `roles`
    pub fn issue<I, S>(&self, username: &str, roles: I) -> Result<IssuedToken, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(self.lifetime)
            .map_err(|_| AuthError::InvalidToken)?;
        let expires_at = now + lifetime;

        let claims = Claims {
            sub: username.to_string(),
            roles: roles.into_iter().map(Into::into).collect(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to sign token");
                AuthError::InvalidToken
            })?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify a token's signature and lifetime
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(Identity {
            username: data.claims.sub,
            roles: data.claims.roles.into_iter().collect(),
        })
    }
}

/// Generate a random signing secret using OsRng
fn generate_secret() -> Vec<u8> {
    let mut bytes = [0u8; GENERATED_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes).into_bytes()
}
