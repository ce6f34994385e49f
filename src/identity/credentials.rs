//! Credential store
//!
//! Owns user records and the rules every mutation must respect: identifier
//! shapes, role assignment, and the built-in system account that can neither
//! be created through [`CredentialStore::create`] nor deleted.
//!
//! Each mutation reaches the repository as one statement, so a concurrent
//! reader never observes a half-updated record.

use std::sync::Arc;

use crate::auth::password::{hash_password, verify_password};
use crate::database::Database;
use crate::error::{AuthError, DbError, IdentityError};
use crate::models::{
    is_system_username, NewUser, UpdateUser, User, UserFilter, UserPage, ADMIN_ROLE,
    DEFAULT_USER_DIR, MAX_FULL_NAME_LENGTH, SYSTEM_USERNAME,
};

use super::privileges::PrivilegeRegistry;
use super::{contains_whitespace, is_valid_identifier};

/// Largest page `list` will return
pub const MAX_PAGE_SIZE: u32 = 1000;

/// User record store
pub struct CredentialStore<D: Database> {
    db: Arc<D>,
    privileges: PrivilegeRegistry<D>,
}

impl<D: Database> CredentialStore<D> {
    pub fn new(db: Arc<D>) -> Self {
        let privileges = PrivilegeRegistry::new(db.clone());
        Self { db, privileges }
    }

    /// Create a user
    pub async fn create(&self, request: &NewUser) -> Result<User, IdentityError> {
        if request.password.is_empty() {
            return Err(IdentityError::validation("Password is empty"));
        }
        if is_system_username(&request.username) {
            return Err(IdentityError::protected(format!(
                "{} is the internal user and can not be created",
                request.username
            )));
        }
        check_full_name(&request.full_name)?;

        let roles = self
            .privileges
            .validate_assignment(&request.username, &request.roles)
            .await?;

        let user_dir = match request.user_dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => {
                check_user_dir(dir)?;
                dir.to_string()
            }
            None => request.username.clone(),
        };

        let hash = hash_password(&request.password)?;
        let mut user = User::new(&request.username, hash)
            .with_full_name(&request.full_name)
            .with_roles(join_roles(roles))
            .with_user_dir(user_dir);

        let id = self.db.insert_user(&user).await.map_err(|e| match e {
            DbError::ConstraintViolation(_) => IdentityError::validation(format!(
                "User {} already exists",
                request.username
            )),
            other => other.into(),
        })?;
        user.id = Some(id);

        tracing::info!(username = %user.username, id, "User created");
        Ok(user)
    }

    /// Delete a user by id
    pub async fn delete(&self, id: i64) -> Result<(), IdentityError> {
        let user = self
            .db
            .get_user(id)
            .await?
            .ok_or_else(|| IdentityError::not_found(format!("User id {} does not exist", id)))?;

        if user.is_system() {
            return Err(IdentityError::protected(
                "The internal user can not be removed",
            ));
        }

        self.db.delete_user(id).await.map_err(|e| match e {
            DbError::NotFound => IdentityError::not_found(format!("User id {} does not exist", id)),
            other => other.into(),
        })?;

        tracing::info!(username = %user.username, id, "User deleted");
        Ok(())
    }

    /// Replace a user's password
    ///
    /// `acting` is the authenticated caller. Anyone but the system account must
    /// present the target's current password. A missing system account is
    /// recreated with the new password.
    pub async fn change_password(
        &self,
        acting: &str,
        target: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        if acting.is_empty() || target.is_empty() || new_password.is_empty() {
            return Err(IdentityError::validation("User or password is empty"));
        }

        let existing = self.db.find_user_by_username(target).await?;
        if existing.is_none() && target != SYSTEM_USERNAME {
            return Err(IdentityError::not_found(format!(
                "User {} does not exist",
                target
            )));
        }

        if acting != SYSTEM_USERNAME {
            let verified = existing
                .as_ref()
                .is_some_and(|user| verify_password(old_password, &user.password_hash));
            if !verified {
                return Err(AuthError::InvalidCredentials.into());
            }
        }

        let hash = hash_password(new_password)?;
        match existing {
            Some(user) => {
                if !self.db.update_password(&user.username, &hash).await? {
                    return Err(IdentityError::not_found(format!(
                        "User {} does not exist",
                        target
                    )));
                }
            }
            None => {
                if self.db.insert_user_if_absent(&User::system(hash.clone())).await? {
                    tracing::warn!("System account was missing and has been recreated");
                } else {
                    // Created concurrently by bootstrap
                    self.db.update_password(SYSTEM_USERNAME, &hash).await?;
                }
            }
        }

        tracing::info!(acting, target, "Password changed");
        Ok(())
    }

    /// Update a user's profile
    pub async fn update(&self, request: &UpdateUser) -> Result<(), IdentityError> {
        if request.username.is_empty() {
            return Err(IdentityError::validation("User is empty"));
        }
        check_full_name(&request.full_name)?;

        if self.db.find_user_by_username(&request.username).await?.is_none() {
            return Err(IdentityError::validation(format!(
                "User {} does not exist",
                request.username
            )));
        }

        let roles = match request.roles.as_deref().filter(|r| !r.is_empty()) {
            Some(roles) => Some(join_roles(
                self.privileges
                    .validate_assignment(&request.username, roles)
                    .await?,
            )),
            None => None,
        };

        let user_dir = match request.user_dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => {
                check_user_dir(dir)?;
                Some(dir.to_string())
            }
            None => None,
        };

        let update = UpdateUser {
            username: request.username.clone(),
            full_name: request.full_name.clone(),
            roles,
            user_dir,
        };

        if !self.db.update_user_profile(&update).await? {
            return Err(IdentityError::validation(format!(
                "User {} does not exist",
                request.username
            )));
        }

        tracing::info!(username = %request.username, "User updated");
        Ok(())
    }

    /// Look up a user by exact username
    ///
    /// When the system account has not been persisted yet, a default view of
    /// it is returned without being stored. Only the exact reserved spelling
    /// gets that view.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, IdentityError> {
        if username.is_empty() {
            return Err(IdentityError::validation("Username can not be empty"));
        }

        if let Some(user) = self.db.find_user_by_username(username).await? {
            return Ok(Some(user));
        }

        if username == SYSTEM_USERNAME {
            tracing::debug!("System account not persisted, using the default view");
            let user = User::new(SYSTEM_USERNAME, hash_password(SYSTEM_USERNAME)?)
                .with_roles(ADMIN_ROLE)
                .with_user_dir(DEFAULT_USER_DIR);
            return Ok(Some(user));
        }

        Ok(None)
    }

    /// One page of users matching `filter`, ordered by id
    ///
    /// `page` is 0-based; `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list(
        &self,
        filter: &UserFilter,
        page: u32,
        page_size: u32,
    ) -> Result<UserPage, IdentityError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page) * u64::from(page_size);

        Ok(self.db.list_users(filter, page_size, offset).await?)
    }

    /// Create the system account if it does not exist
    ///
    /// Safe to call on every start.
    pub async fn bootstrap(&self) -> Result<(), IdentityError> {
        if self.db.find_user_by_username(SYSTEM_USERNAME).await?.is_some() {
            tracing::debug!("System account present");
            return Ok(());
        }

        let user = User::system(hash_password(SYSTEM_USERNAME)?);
        if self.db.insert_user_if_absent(&user).await? {
            tracing::info!(username = SYSTEM_USERNAME, "System account created");
        }

        Ok(())
    }
}

fn check_full_name(full_name: &str) -> Result<(), IdentityError> {
    if full_name.chars().count() > MAX_FULL_NAME_LENGTH {
        return Err(IdentityError::validation(format!(
            "Full name is longer than {} characters",
            MAX_FULL_NAME_LENGTH
        )));
    }
    Ok(())
}

fn check_user_dir(dir: &str) -> Result<(), IdentityError> {
    if contains_whitespace(dir) {
        return Err(IdentityError::validation(format!(
            "User dir {} contains whitespace",
            dir
        )));
    }
    if !is_valid_identifier(dir) {
        return Err(IdentityError::validation(
            "User dir must be A-Z a-z _ 0-9, length 3 to 18",
        ));
    }
    Ok(())
}

fn join_roles(roles: impl IntoIterator<Item = String>) -> String {
    roles.into_iter().collect::<Vec<_>>().join(",")
}
