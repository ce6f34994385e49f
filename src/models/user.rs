//! User-related domain models
//!
//! This module defines the user record, the request payloads that mutate it,
//! and the reserved identifiers of the built-in system account.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Username of the built-in system account
pub const SYSTEM_USERNAME: &str = "jarboot";

/// Role that only the system account may hold
pub const SYSTEM_ROLE: &str = "ROLE_SYS";

/// Administrator role
pub const ADMIN_ROLE: &str = "ROLE_ADMIN";

/// Working directory assigned to the bootstrapped system account
pub const DEFAULT_USER_DIR: &str = "default";

/// Maximum number of characters in a full name
pub const MAX_FULL_NAME_LENGTH: usize = 26;

/// Stored user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Repository id (None for records that were never persisted)
    pub id: Option<i64>,

    /// Unique login name
    pub username: String,

    /// Display name, may be empty
    pub full_name: String,

    /// Argon2id hash, never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// Comma-separated role names
    pub roles: String,

    /// Working directory identifier
    pub user_dir: String,

    /// When the record was created
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Create a user whose working directory defaults to the username
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: None,
            user_dir: username.clone(),
            username,
            full_name: String::new(),
            password_hash: password_hash.into(),
            roles: String::new(),
            created_at: None,
        }
    }

    /// The persisted system account as written by bootstrap
    pub fn system(password_hash: impl Into<String>) -> Self {
        Self::new(SYSTEM_USERNAME, password_hash)
            .with_roles(format!("{},{}", SYSTEM_ROLE, ADMIN_ROLE))
            .with_user_dir(DEFAULT_USER_DIR)
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    pub fn with_roles(mut self, roles: impl Into<String>) -> Self {
        self.roles = roles.into();
        self
    }

    pub fn with_user_dir(mut self, user_dir: impl Into<String>) -> Self {
        self.user_dir = user_dir.into();
        self
    }

    /// Interpreted role set (trimmed, deduplicated)
    pub fn role_set(&self) -> BTreeSet<String> {
        parse_roles(&self.roles)
    }

    /// Whether this is the reserved system account
    pub fn is_system(&self) -> bool {
        self.username == SYSTEM_USERNAME
    }
}

/// Split a comma-separated role list into a trimmed, deduplicated set
///
/// Empty segments are dropped.
pub fn parse_roles(roles: &str) -> BTreeSet<String> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `name` is the reserved system username, ignoring case
pub fn is_system_username(name: &str) -> bool {
    name.eq_ignore_ascii_case(SYSTEM_USERNAME)
}

/// Request to create a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,

    #[serde(default)]
    pub full_name: String,

    pub password: String,

    pub roles: String,

    /// Defaults to the username when absent or empty
    #[serde(default)]
    pub user_dir: Option<String>,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        roles: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            full_name: String::new(),
            password: password.into(),
            roles: roles.into(),
            user_dir: None,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    pub fn with_user_dir(mut self, user_dir: impl Into<String>) -> Self {
        self.user_dir = Some(user_dir.into());
        self
    }
}

/// Request to update a user's profile
///
/// `roles` and `user_dir` are only applied when present and non-empty;
/// `full_name` is always applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUser {
    pub username: String,

    #[serde(default)]
    pub full_name: String,

    #[serde(default)]
    pub roles: Option<String>,

    #[serde(default)]
    pub user_dir: Option<String>,
}

impl UpdateUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    pub fn with_roles(mut self, roles: impl Into<String>) -> Self {
        self.roles = Some(roles.into());
        self
    }

    pub fn with_user_dir(mut self, user_dir: impl Into<String>) -> Self {
        self.user_dir = Some(user_dir.into());
        self
    }
}

/// Listing filter; empty fields do not constrain the result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    /// Substring of the username
    #[serde(default)]
    pub username: Option<String>,

    /// Substring of the roles column
    #[serde(default)]
    pub role: Option<String>,
}

impl UserFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Username term, if non-empty
    pub fn username_term(&self) -> Option<&str> {
        self.username.as_deref().filter(|s| !s.is_empty())
    }

    /// Role term, if non-empty
    pub fn role_term(&self) -> Option<&str> {
        self.role.as_deref().filter(|s| !s.is_empty())
    }

    /// True when no field constrains the listing
    pub fn is_empty(&self) -> bool {
        self.username_term().is_none() && self.role_term().is_none()
    }
}

/// One page of users plus the total number of matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPage {
    pub items: Vec<User>,
    pub total: u64,
}
