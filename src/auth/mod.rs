//! Authentication system for jarboot-auth
//!
//! This module provides authentication functionality:
//! - Password hashing and login
//! - Bearer token issuing and verification
//! - Inter-node trust for clustered deployments
//! - The per-request authentication gate
//! - Rate limiting for failed logins

pub mod cluster;
pub mod context;
pub mod gate;
pub mod manager;
pub mod password;
pub mod ratelimit;
pub mod token;

pub use cluster::{ClusterTrust, InboundRequest, SharedSecretTrust};
pub use context::{SecurityContext, TrustLevel};
pub use gate::{AuthGate, GateDecision, Rejection};
pub use manager::{AuthManager, LoginRequest, LoginResponse};
pub use password::{hash_password, verify_password, HashError};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use token::{Identity, IssuedToken, TokenManager};
