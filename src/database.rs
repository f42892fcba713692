//! database (db) union structure.
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};

use crate::config;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Custom db structure to pass to Axum.
#[derive(Clone, Debug)]
pub struct Database {
    pub sqlite: SqlitePool,
}

impl Database {
    /// Open (or create) the SQLite database and run migrations.
    pub async fn new(config: &config::Database) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let sqlite = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        sqlx::migrate!().run(&sqlite).await?;

        tracing::info!(path = %config.path, "sqlite connected");

        Ok(Self { sqlite })
    }
}
