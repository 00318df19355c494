//! Authorization lookup.
//!
//! Resolves a username to its authorized role by scanning the platform's
//! user tables from least privilege upward, the way the identity mock has
//! always worked. A real IdAM service would replace the `Authorizer`
//! implementation, not the seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

/// Result type for authorization lookups.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors from the authorization backend.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity store could not be queried.
    #[error("authorization lookup failed: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Authorization level of a platform user; doubles as the label role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Coordinator,
}

impl Role {
    /// Role string as used for labels and instance environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Coordinator => "coordinator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seam for the external credential/authorization lookup.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Resolve `username` to its role, `None` when the user is unknown.
    async fn resolve_authorization(&self, username: &str) -> AuthResult<Option<Role>>;
}

/// Authorizer backed by the platform's Postgres user tables.
#[derive(Debug, Clone)]
pub struct PostgresAuthorizer {
    pool: PgPool,
}

impl PostgresAuthorizer {
    /// Create an authorizer over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn user_exists(&self, table_query: &str, username: &str) -> AuthResult<bool> {
        let row: Option<String> = sqlx::query_scalar(table_query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_deref() == Some(username))
    }
}

#[async_trait]
impl Authorizer for PostgresAuthorizer {
    async fn resolve_authorization(&self, username: &str) -> AuthResult<Option<Role>> {
        // Least privilege first.
        let lookups: [(&str, Role); 3] = [
            (
                "SELECT username FROM student WHERE username = $1 LIMIT 1",
                Role::Student,
            ),
            (
                "SELECT username FROM instructor WHERE username = $1 LIMIT 1",
                Role::Instructor,
            ),
            (
                "SELECT username FROM coordinator WHERE username = $1 LIMIT 1",
                Role::Coordinator,
            ),
        ];

        for (query, role) in lookups {
            if self.user_exists(query, username).await? {
                return Ok(Some(role));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_strings() {
        assert_eq!(Role::Student.as_str(), "student");
        assert_eq!(Role::Instructor.as_str(), "instructor");
        assert_eq!(Role::Coordinator.as_str(), "coordinator");
        assert_eq!(Role::Student.to_string(), "student");
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(
            serde_json::to_string(&Role::Coordinator).unwrap(),
            "\"coordinator\""
        );
        let role: Role = serde_json::from_str("\"instructor\"").unwrap();
        assert_eq!(role, Role::Instructor);
    }
}
