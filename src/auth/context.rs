//! Per-request security context
//!
//! The gate builds a `SecurityContext` for each admitted request and stores it
//! in the request's extensions. Handlers receive it as an explicit argument;
//! there is no process-wide "current user".

use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::SYSTEM_ROLE;

/// How the caller was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustLevel {
    /// An end-user, authenticated locally or vouched for by a peer node
    User,

    /// A trusted peer node acting on its own behalf
    Peer,
}

/// Authenticated principal attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityContext {
    /// Username; absent for peer-node calls
    pub identity: Option<String>,

    pub roles: BTreeSet<String>,

    pub trust_level: TrustLevel,
}

impl SecurityContext {
    /// Context for an end-user
    pub fn user(username: impl Into<String>, roles: BTreeSet<String>) -> Self {
        Self {
            identity: Some(username.into()),
            roles,
            trust_level: TrustLevel::User,
        }
    }

    /// Context for a trusted peer node
    pub fn peer() -> Self {
        Self {
            identity: None,
            roles: BTreeSet::new(),
            trust_level: TrustLevel::Peer,
        }
    }

    /// Username, if the caller is an end-user
    pub fn username(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_peer(&self) -> bool {
        self.trust_level == TrustLevel::Peer
    }

    /// Whether the context holds the reserved system role
    pub fn is_system(&self) -> bool {
        self.roles.contains(SYSTEM_ROLE)
    }
}
