//! Domain models for jarboot-auth
//!
//! This module contains the core domain models used throughout the application.

pub mod privilege;
pub mod user;

// Re-export commonly used types
pub use privilege::{PrivilegeGrant, Role, PRIVILEGE_MGR, ROLE_MGR, USER_MGR};
pub use user::{
    is_system_username, parse_roles, NewUser, UpdateUser, User, UserFilter, UserPage,
    ADMIN_ROLE, DEFAULT_USER_DIR, MAX_FULL_NAME_LENGTH, SYSTEM_ROLE, SYSTEM_USERNAME,
};
