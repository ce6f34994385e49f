//! Authentication manager
//!
//! This module provides the password login used to obtain bearer tokens.
//! Failed logins are throttled per client IP.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::{AuthError, IdentityError};
use crate::identity::CredentialStore;

use super::password::verify_password;
use super::ratelimit::{RateLimitConfig, RateLimiter};
use super::token::TokenManager;

/// Login request body
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Authentication manager
pub struct AuthManager<D: Database> {
    credentials: Arc<CredentialStore<D>>,
    tokens: Arc<TokenManager>,
    rate_limiter: RateLimiter,
}

impl<D: Database> AuthManager<D> {
    /// Create a new authentication manager
    pub fn new(
        credentials: Arc<CredentialStore<D>>,
        tokens: Arc<TokenManager>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            credentials,
            tokens,
            rate_limiter: RateLimiter::new(rate_limit),
        }
    }

    /// Verify a username/password pair and issue a token
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip: Option<IpAddr>,
    ) -> Result<LoginResponse, IdentityError> {
        // Check rate limiting
        if let Some(ip) = ip {
            if let Some(remaining) = self.rate_limiter.remaining_block_time(ip) {
                tracing::warn!(%ip, remaining_secs = remaining.as_secs(), "Login refused, IP blocked");
                return Err(AuthError::RateLimited.into());
            }
        }

        let user = if username.is_empty() || password.is_empty() {
            None
        } else {
            self.credentials.find_by_username(username).await?
        };

        let user = match user {
            Some(user) if verify_password(password, &user.password_hash) => user,
            _ => {
                if let Some(ip) = ip {
                    self.rate_limiter.record_failure(ip);
                }
                tracing::warn!(username, "Login failed");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        // Reset rate limiter on success
        if let Some(ip) = ip {
            self.rate_limiter.reset(ip);
        }

        let roles: Vec<String> = user.role_set().into_iter().collect();
        let issued = self.tokens.issue(&user.username, roles.iter().cloned())?;

        tracing::info!(username = %user.username, "Login succeeded");
        Ok(LoginResponse {
            token: issued.token,
            username: user.username,
            roles,
            expires_at: issued.expires_at,
        })
    }

    /// Check if an IP is rate limited
    pub fn is_rate_limited(&self, ip: IpAddr) -> bool {
        self.rate_limiter.is_blocked(ip)
    }

    /// Drop expired rate limiter entries
    pub fn cleanup_rate_limits(&self) {
        self.rate_limiter.cleanup();
    }
}
