//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations. All statements run
//! on the single connection thread owned by `tokio_rusqlite::Connection`, so
//! each write is applied atomically with respect to every reader.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::Database;
use crate::error::DbError;
use crate::models::{PrivilegeGrant, Role, UpdateUser, User, UserFilter, UserPage};

const USER_COLUMNS: &str = "id, username, full_name, password, roles, user_dir, created_at";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", migration_version())?;
            Ok(())
        })
        .await?;

        tracing::debug!(path, version = migration_version(), "Schema ready");

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // User operations
    // =========================================================================

    async fn insert_user(&self, user: &User) -> Result<i64, DbError> {
        let user = user.clone();

        let id = self
            .conn
            .call(move |conn| {
                let created_at = user.created_at.unwrap_or_else(Utc::now).to_rfc3339();
                let result = conn.execute(
                    r#"
                    INSERT INTO users (username, full_name, password, roles, user_dir, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![
                        user.username,
                        user.full_name,
                        user.password_hash,
                        user.roles,
                        user.user_dir,
                        created_at
                    ],
                );
                match result {
                    Ok(_) => Ok(Some(conn.last_insert_rowid())),
                    Err(e) if is_constraint_violation(&e) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        id.ok_or_else(|| DbError::ConstraintViolation("username".to_string()))
    }

    async fn insert_user_if_absent(&self, user: &User) -> Result<bool, DbError> {
        let user = user.clone();

        self.conn
            .call(move |conn| {
                let created_at = user.created_at.unwrap_or_else(Utc::now).to_rfc3339();
                let count = conn.execute(
                    r#"
                    INSERT OR IGNORE INTO users
                    (username, full_name, password, roles, user_dir, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![
                        user.username,
                        user.full_name,
                        user.password_hash,
                        user.roles,
                        user.user_dir,
                        created_at
                    ],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
                let user = conn
                    .query_row(&sql, [id], row_to_user)
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let username = username.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
                let user = conn
                    .query_row(&sql, [&username], row_to_user)
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_user_profile(&self, update: &UpdateUser) -> Result<bool, DbError> {
        let update = update.clone();

        self.conn
            .call(move |conn| {
                // COALESCE keeps the stored value when the field is not supplied
                let count = conn.execute(
                    r#"
                    UPDATE users
                    SET full_name = ?2,
                        roles = COALESCE(?3, roles),
                        user_dir = COALESCE(?4, user_dir)
                    WHERE username = ?1
                    "#,
                    rusqlite::params![
                        update.username,
                        update.full_name,
                        update.roles,
                        update.user_dir
                    ],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_password(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<bool, DbError> {
        let username = username.to_string();
        let password_hash = password_hash.to_string();

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    "UPDATE users SET password = ?2 WHERE username = ?1",
                    rusqlite::params![username, password_hash],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Into::into)
    }

    async fn delete_user(&self, id: i64) -> Result<(), DbError> {
        let count = self
            .conn
            .call(move |conn| {
                let count = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
                Ok(count)
            })
            .await?;

        if count == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        limit: u32,
        offset: u64,
    ) -> Result<UserPage, DbError> {
        let (where_clause, params) = user_filter_clause(filter);

        self.conn
            .call(move |conn| {
                // Count and page inside one transaction so both see the same snapshot
                let tx = conn.transaction()?;

                let count_sql = format!("SELECT COUNT(*) FROM users{}", where_clause);
                let total: i64 = tx.query_row(
                    &count_sql,
                    rusqlite::params_from_iter(params.iter()),
                    |row| row.get(0),
                )?;

                let page_sql = format!(
                    "SELECT {} FROM users{} ORDER BY id LIMIT {} OFFSET {}",
                    USER_COLUMNS, where_clause, limit, offset
                );
                let items = {
                    let mut stmt = tx.prepare(&page_sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(params.iter()), row_to_user)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };

                tx.commit()?;

                Ok(UserPage {
                    items,
                    total: total as u64,
                })
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Role operations
    // =========================================================================

    async fn role_exists(&self, role: &str) -> Result<bool, DbError> {
        let role = role.to_string();

        self.conn
            .call(move |conn| {
                let exists = conn
                    .query_row("SELECT 1 FROM roles WHERE role = ?1", [&role], |_| Ok(()))
                    .optional()?
                    .is_some();
                Ok(exists)
            })
            .await
            .map_err(Into::into)
    }

    async fn insert_role(&self, role: &Role) -> Result<(), DbError> {
        let role = role.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO roles (role, name) VALUES (?1, ?2)",
                    rusqlite::params![role.role, role.name],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT role, name FROM roles ORDER BY role")?;

                let roles = stmt
                    .query_map([], |row| {
                        Ok(Role {
                            role: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(roles)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Privilege operations
    // =========================================================================

    async fn get_privilege(&self, role: &str, code: &str) -> Result<Option<bool>, DbError> {
        let role = role.to_string();
        let code = code.to_string();

        self.conn
            .call(move |conn| {
                let granted = conn
                    .query_row(
                        "SELECT granted FROM privileges WHERE role = ?1 AND code = ?2",
                        rusqlite::params![role, code],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                Ok(granted.map(|g| g != 0))
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_privilege(&self, grant: &PrivilegeGrant) -> Result<(), DbError> {
        let grant = grant.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO privileges (role, code, granted)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(role, code) DO UPDATE SET granted = excluded.granted
                    "#,
                    rusqlite::params![grant.role, grant.code, grant.granted as i64],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn list_privileges_by_role(&self, role: &str) -> Result<Vec<PrivilegeGrant>, DbError> {
        let role = role.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT role, code, granted FROM privileges WHERE role = ?1 ORDER BY code",
                )?;

                let grants = stmt
                    .query_map([&role], |row| {
                        Ok(PrivilegeGrant {
                            role: row.get(0)?,
                            code: row.get(1)?,
                            granted: row.get::<_, i64>(2)? != 0,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(grants)
            })
            .await
            .map_err(Into::into)
    }
}

/// Build the WHERE clause and its parameters from the non-empty filter fields
///
/// Each present field contributes one substring predicate; the predicates are
/// ANDed. `LIKE` ignores ASCII case. Password and user dir never take part.
fn user_filter_clause(filter: &UserFilter) -> (String, Vec<String>) {
    let mut predicates = Vec::new();
    let mut params = Vec::new();

    if let Some(username) = filter.username_term() {
        predicates.push("username LIKE ? ESCAPE '\\'");
        params.push(contains_pattern(username));
    }
    if let Some(role) = filter.role_term() {
        predicates.push("roles LIKE ? ESCAPE '\\'");
        params.push(contains_pattern(role));
    }

    if predicates.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", predicates.join(" AND ")), params)
    }
}

/// LIKE pattern matching `term` anywhere, with wildcards in `term` escaped
fn contains_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: Some(row.get(0)?),
        username: row.get(1)?,
        full_name: row.get(2)?,
        password_hash: row.get(3)?,
        roles: row.get(4)?,
        user_dir: row.get(5)?,
        created_at: parse_datetime(row.get::<_, Option<String>>(6)?),
    })
}

/// Parse datetime string from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
