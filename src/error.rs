//! Application error types for jarboot-auth
//!
//! This module defines the error taxonomy shared by the identity store, the
//! privilege registry and the authentication gate.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::auth::password::HashError;

/// Authentication-related errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Token signature or payload is invalid
    #[error("Invalid token")]
    InvalidToken,

    /// Token lifetime has passed
    #[error("Token expired")]
    TokenExpired,

    /// Username or password is not correct
    #[error("Password or username is not correct")]
    InvalidCredentials,

    /// Rate limited due to too many failed attempts
    #[error("Rate limited: too many failed attempts")]
    RateLimited,
}

/// Errors raised by identity, role and privilege operations
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Malformed input: empty, whitespace, length, pattern or unknown role
    #[error("{0}")]
    Validation(String),

    /// Referenced user or id does not exist
    #[error("{0}")]
    NotFound(String),

    /// Attempted mutation of the reserved system account
    #[error("{0}")]
    Protected(String),

    /// Disallowed role assignment or failed capability check
    #[error("{0}")]
    Forbidden(String),

    /// Credential verification failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Repository failure
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Password hashing failure
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
}

impl IdentityError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn protected(msg: impl Into<String>) -> Self {
        Self::Protected(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection worker error
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Cluster credential errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClusterError {
    /// Credential could not be decoded
    #[error("Malformed cluster credential: {0}")]
    Malformed(String),

    /// MAC could not be computed
    #[error("Cluster signing failed: {0}")]
    Signing(String),
}

/// Application-level error type
///
/// Aggregates the domain-specific error types for the binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Identity error
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
