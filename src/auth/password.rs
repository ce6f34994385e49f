//! Password hashing and verification
//!
//! Passwords are hashed with Argon2id into PHC strings. The stored hash carries
//! its own salt and parameters, so verification needs nothing but the hash.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

/// Hash a password using Argon2id
///
/// Every call uses a fresh random salt, so hashing the same password twice
/// yields different strings.
///
/// # Example
///
/// ```
/// use jarboot_auth::auth::password::{hash_password, verify_password};
///
/// let hash = hash_password("s3cret").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// assert!(verify_password("s3cret", &hash));
/// ```
pub fn hash_password(password: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError::HashFailed(e.to_string()))
}

/// Verify a password against a stored hash
///
/// Returns `false` for a malformed hash instead of failing, so a corrupt
/// record can never authenticate. The comparison inside argon2 is constant-time.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Error type for password hashing operations
#[derive(Debug, Clone, PartialEq)]
pub enum HashError {
    /// Hashing failed
    HashFailed(String),
}

impl std::fmt::Display for HashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashError::HashFailed(msg) => write!(f, "Hash failed: {}", msg),
        }
    }
}

impl std::error::Error for HashError {}
