use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::Result;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect using a full `sqlite:` connection string
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file at `path`
    pub async fn open_file(path: &str) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path);
        Self::connect(&url).await
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create the blob table used by the SQLite storage provider
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                filename TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                length INTEGER NOT NULL,
                upload_date TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Blob store migrations completed");
        Ok(())
    }
}
