//! Database connection and pool management
//!
//! SQLite via sqlx. The schema is a single `pages` table keyed uniquely by
//! URL; `migrate()` creates it on first run.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        // In-memory databases need no file scaffolding.
        if !db_path.contains(":memory:") && !db_path.contains("mode=memory") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)
                    .with_context(|| format!("failed to create database file {db_path}"))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to connect to {database_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap reachability check used as the startup gate.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database is unreachable")?;
        Ok(())
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                status INTEGER NOT NULL,
                fetched_at DATETIME NOT NULL,
                sha256 TEXT NOT NULL,
                html TEXT NOT NULL,
                text_content TEXT NOT NULL,
                meta TEXT NOT NULL,
                data TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_sha256 ON pages (sha256)")
            .execute(&self.pool)
            .await?;

        info!("database schema is up to date");
        Ok(())
    }
}
