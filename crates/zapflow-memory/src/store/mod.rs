//! SQLite-backed persistent store.
//!
//! Split into focused submodules:
//! - `state`: conversation context, instance variables, contacts, message/event/alert logs
//! - `jobs`: scheduled job CRUD, cadence reset, due-job polling

mod jobs;
mod state;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use zapflow_core::{config::MemoryConfig, error::ZapError, shellexpand};

/// Persistent store backed by SQLite, scoped to one instance.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    instance_id: String,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &MemoryConfig, instance_id: &str) -> Result<Self, ZapError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ZapError::Memory(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| ZapError::Memory(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| ZapError::Memory(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Store initialized at {db_path} (instance {instance_id})");

        Ok(Self {
            pool,
            instance_id: instance_id.to_string(),
        })
    }

    /// Open a private in-memory store. Used by tests and dry runs.
    pub async fn open_in_memory(instance_id: &str) -> Result<Self, ZapError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ZapError::Memory(format!("invalid db path: {e}")))?
            .create_if_missing(true);
        // One connection: every sqlite::memory: connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| ZapError::Memory(format!("failed to open in-memory sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            instance_id: instance_id.to_string(),
        })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), ZapError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| ZapError::Memory(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            (
                "002_scheduled_jobs",
                include_str!("../../migrations/002_scheduled_jobs.sql"),
            ),
            (
                "003_events_alerts",
                include_str!("../../migrations/003_events_alerts.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        ZapError::Memory(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| ZapError::Memory(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| ZapError::Memory(format!("failed to record migration {name}: {e}")))?;
        }
        Ok(())
    }
}
