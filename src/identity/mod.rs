//! Identity management
//!
//! User records with their mutation rules, and the role/privilege model that
//! authorization checks are based on.

pub mod credentials;
pub mod privileges;

pub use credentials::{CredentialStore, MAX_PAGE_SIZE};
pub use privileges::PrivilegeRegistry;

use std::sync::LazyLock;

use regex_lite::Regex;

/// Shape shared by usernames and user directories
pub const IDENTIFIER_PATTERN: &str = "^[A-Za-z_0-9]{3,18}$";

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(IDENTIFIER_PATTERN).expect("Invalid identifier pattern")
});

/// Whether `value` is a valid username or user directory
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

pub(crate) fn contains_whitespace(value: &str) -> bool {
    value.chars().any(char::is_whitespace)
}
