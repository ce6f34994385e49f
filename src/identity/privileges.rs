//! Role and privilege registry
//!
//! Roles must exist before they can be assigned. Capabilities are granted per
//! role; a missing grant means "denied". The only implicit grant is the system
//! role, which passes every capability check.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::auth::context::SecurityContext;
use crate::database::Database;
use crate::error::IdentityError;
use crate::models::{parse_roles, PrivilegeGrant, Role, SYSTEM_ROLE, SYSTEM_USERNAME};

use super::{contains_whitespace, is_valid_identifier};

/// Role/privilege registry over a repository
pub struct PrivilegeRegistry<D: Database> {
    db: Arc<D>,
}

impl<D: Database> PrivilegeRegistry<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }

    /// Validate a username together with the roles it is about to hold
    ///
    /// Returns the interpreted role set.
    pub async fn validate_assignment(
        &self,
        username: &str,
        roles: &str,
    ) -> Result<BTreeSet<String>, IdentityError> {
        if username.is_empty() {
            return Err(IdentityError::validation("Username is empty"));
        }
        if contains_whitespace(username) {
            return Err(IdentityError::validation(format!(
                "Username {} contains whitespace",
                username
            )));
        }
        if roles.is_empty() {
            return Err(IdentityError::validation("Role is empty"));
        }
        if contains_whitespace(roles) {
            return Err(IdentityError::validation("Role contains whitespace"));
        }
        if !is_valid_identifier(username) {
            return Err(IdentityError::validation(
                "Username must be A-Z a-z _ 0-9, length 3 to 18",
            ));
        }

        let role_set = parse_roles(roles);
        if role_set.is_empty() {
            return Err(IdentityError::validation("Role is empty"));
        }

        if role_set.contains(SYSTEM_ROLE) && username != SYSTEM_USERNAME {
            return Err(IdentityError::forbidden(
                "Can not assign the system role to a normal user",
            ));
        }

        for role in &role_set {
            if !self.db.role_exists(role).await? {
                return Err(IdentityError::validation(format!(
                    "Role {} does not exist",
                    role
                )));
            }
        }

        Ok(role_set)
    }

    /// Stored grant for (role, code), `false` when absent
    pub async fn has_privilege(&self, role: &str, code: &str) -> Result<bool, IdentityError> {
        Ok(self.db.get_privilege(role, code).await?.unwrap_or(false))
    }

    /// Upsert a grant; the role need not exist yet
    pub async fn save_privilege(
        &self,
        role: &str,
        code: &str,
        granted: bool,
    ) -> Result<(), IdentityError> {
        if role.trim().is_empty() || code.trim().is_empty() {
            return Err(IdentityError::validation("Role and privilege code are required"));
        }

        self.db
            .upsert_privilege(&PrivilegeGrant::new(role, code, granted))
            .await?;

        tracing::info!(role, code, granted, "Privilege saved");
        Ok(())
    }

    /// All grants recorded for a role
    pub async fn list_by_role(&self, role: &str) -> Result<Vec<PrivilegeGrant>, IdentityError> {
        Ok(self.db.list_privileges_by_role(role).await?)
    }

    /// Refuse with `Forbidden` unless the context may use capability `code`
    pub async fn require_capability(
        &self,
        ctx: &SecurityContext,
        code: &str,
    ) -> Result<(), IdentityError> {
        if ctx.is_system() {
            return Ok(());
        }

        for role in &ctx.roles {
            if self.has_privilege(role, code).await? {
                return Ok(());
            }
        }

        tracing::warn!(
            username = ctx.username().unwrap_or_default(),
            code,
            "Capability check failed"
        );
        Err(IdentityError::forbidden(format!("Permission denied: {}", code)))
    }

    /// Register a role (no-op if it already exists)
    pub async fn add_role(&self, role: &str, name: &str) -> Result<(), IdentityError> {
        if role.is_empty() || contains_whitespace(role) || role.contains(',') {
            return Err(IdentityError::validation(format!("Invalid role name: {}", role)));
        }

        self.db.insert_role(&Role::new(role, name)).await?;
        Ok(())
    }

    /// All known roles
    pub async fn list_roles(&self) -> Result<Vec<Role>, IdentityError> {
        Ok(self.db.list_roles().await?)
    }
}
