//! Role and privilege domain models

use serde::{Deserialize, Serialize};

/// Capability code guarding user management operations
pub const USER_MGR: &str = "USER_MGR";

/// Capability code guarding privilege management operations
pub const PRIVILEGE_MGR: &str = "PRIVILEGE_MGR";

/// Capability code guarding role management operations
pub const ROLE_MGR: &str = "ROLE_MGR";

/// A role known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role token, e.g. `ROLE_ADMIN`
    pub role: String,

    /// Human-readable name
    pub name: String,
}

impl Role {
    pub fn new(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: name.into(),
        }
    }
}

/// Grant (or explicit denial) of a capability to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeGrant {
    pub role: String,

    /// Capability code
    pub code: String,

    pub granted: bool,
}

impl PrivilegeGrant {
    pub fn new(role: impl Into<String>, code: impl Into<String>, granted: bool) -> Self {
        Self {
            role: role.into(),
            code: code.into(),
            granted,
        }
    }
}
