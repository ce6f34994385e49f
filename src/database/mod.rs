//! Database layer for jarboot-auth
//!
//! This module defines the repository trait for users, roles and privilege
//! grants, and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{PrivilegeGrant, Role, UpdateUser, User, UserFilter, UserPage};

/// Repository trait for identity persistence
///
/// Every mutating method is a single atomic write: a concurrent reader sees
/// either the old record or the new one, never a mix.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // User operations
    // =========================================================================

    /// Insert a user record
    ///
    /// Returns the new id, or `DbError::ConstraintViolation` if the username
    /// is taken.
    async fn insert_user(&self, user: &User) -> Result<i64, DbError>;

    /// Insert a user record unless the username already exists
    ///
    /// Returns true if a row was written.
    async fn insert_user_if_absent(&self, user: &User) -> Result<bool, DbError>;

    /// Get a user by id
    async fn get_user(&self, id: i64) -> Result<Option<User>, DbError>;

    /// Get a user by exact username
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DbError>;

    /// Apply a profile update; the password column is never touched
    ///
    /// `roles` and `user_dir` are written only when `Some`.
    /// Returns false if no such user exists.
    async fn update_user_profile(&self, update: &UpdateUser) -> Result<bool, DbError>;

    /// Replace a user's password hash
    ///
    /// Returns false if no such user exists.
    async fn update_password(&self, username: &str, password_hash: &str)
        -> Result<bool, DbError>;

    /// Delete a user by id
    async fn delete_user(&self, id: i64) -> Result<(), DbError>;

    /// List users matching the filter, ordered by id
    async fn list_users(
        &self,
        filter: &UserFilter,
        limit: u32,
        offset: u64,
    ) -> Result<UserPage, DbError>;

    // =========================================================================
    // Role operations
    // =========================================================================

    /// Check whether a role exists
    async fn role_exists(&self, role: &str) -> Result<bool, DbError>;

    /// Insert a role (no-op if it already exists)
    async fn insert_role(&self, role: &Role) -> Result<(), DbError>;

    /// List all roles
    async fn list_roles(&self) -> Result<Vec<Role>, DbError>;

    // =========================================================================
    // Privilege operations
    // =========================================================================

    /// Get the stored grant for (role, code)
    async fn get_privilege(&self, role: &str, code: &str) -> Result<Option<bool>, DbError>;

    /// Insert or replace a grant keyed by (role, code)
    async fn upsert_privilege(&self, grant: &PrivilegeGrant) -> Result<(), DbError>;

    /// List all grants for a role
    async fn list_privileges_by_role(&self, role: &str) -> Result<Vec<PrivilegeGrant>, DbError>;
}
