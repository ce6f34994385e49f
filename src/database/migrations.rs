//! Database migrations for jarboot-auth
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Users table
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL DEFAULT '',
    password TEXT NOT NULL,
    roles TEXT NOT NULL DEFAULT '',
    user_dir TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

-- Role registry
CREATE TABLE IF NOT EXISTS roles (
    role TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT ''
);

-- Privilege grants, keyed by (role, code)
CREATE TABLE IF NOT EXISTS privileges (
    role TEXT NOT NULL,
    code TEXT NOT NULL,
    granted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (role, code)
);

CREATE INDEX IF NOT EXISTS idx_privileges_role ON privileges(role);

-- Built-in roles
INSERT OR IGNORE INTO roles (role, name) VALUES ('ROLE_SYS', 'System');
INSERT OR IGNORE INTO roles (role, name) VALUES ('ROLE_ADMIN', 'Administrator');
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
