//! Handle database requests.

use sqlx::SqlitePool;

use crate::error::{Result, ServerError};
use crate::user::{NewUser, User};

const COLUMNS: &str = "id, username, email, external_id, created_at";

#[derive(Clone, Debug)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find the user owning `external_id` or, failing that, `email`.
    ///
    /// A row matching `external_id` always wins over a row matching only
    /// `email`. Email comparison is case-insensitive.
    pub async fn find_by_external_id_or_email(
        &self,
        external_id: &str,
        email: &str,
    ) -> Result<Option<User>> {
        let query = format!(
            r#"SELECT {COLUMNS} FROM users
                WHERE external_id = ? OR email = ?
                ORDER BY external_id = ? DESC, id ASC
                LIMIT 1"#
        );

        Ok(sqlx::query_as::<_, User>(&query)
            .bind(external_id)
            .bind(email)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Insert [`NewUser`] into database.
    ///
    /// Returns [`ServerError::Conflict`] when `email` or `external_id` is
    /// already taken.
    pub async fn create(&self, user: &NewUser) -> Result<User> {
        let query = format!(
            r#"INSERT INTO users (username, email, external_id)
                VALUES (?, ?, ?)
                RETURNING {COLUMNS}"#
        );

        sqlx::query_as::<_, User>(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.external_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if err
                    .as_database_error()
                    .is_some_and(|e| e.is_unique_violation())
                {
                    ServerError::Conflict
                } else {
                    err.into()
                }
            })
    }
}
