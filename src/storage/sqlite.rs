use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::storage::StorageProvider;

/// Blob storage inside a SQLite database (`blobs` table)
pub struct SqliteStorage {
    db: Database,
}

impl SqliteStorage {
    /// Wrap an already migrated database
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect to `url` and create the blob table if needed
    pub async fn connect(url: &str) -> Result<Self> {
        let db = Database::connect(url).await?;
        db.run_migrations().await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl StorageProvider for SqliteStorage {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM blobs WHERE filename = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO blobs (filename, data, length, upload_date) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(data.as_ref())
            .bind(data.len() as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!("Stored blob {} ({} bytes)", name, data.len());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Bytes>> {
        let data: Option<Vec<u8>> = sqlx::query_scalar("SELECT data FROM blobs WHERE filename = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(data.map(Bytes::from))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blobs WHERE filename = ?")
            .bind(name)
            .execute(self.db.pool())
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::debug!("Deleted blob {}", name);
        }
        Ok(removed)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blobs WHERE filename = ?")
            .bind(name)
            .fetch_one(self.db.pool())
            .await?;

        Ok(count > 0)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        if from == to {
            return self.exists(from).await;
        }

        let mut tx = self.db.pool().begin().await?;

        let present: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blobs WHERE filename = ?")
            .bind(from)
            .fetch_one(&mut *tx)
            .await?;
        if present == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM blobs WHERE filename = ?")
            .bind(to)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE blobs SET filename = ? WHERE filename = ?")
            .bind(to)
            .bind(from)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!("Renamed blob {} -> {}", from, to);
        Ok(true)
    }

    fn names(&self) -> BoxStream<'_, Result<String>> {
        sqlx::query_scalar::<_, String>("SELECT filename FROM blobs")
            .fetch(self.db.pool())
            .map(|row| row.map_err(AppError::from))
            .boxed()
    }

    async fn close(&self) {
        self.db.close().await;
    }

    fn storage_type(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteStorage {
        let path = dir.path().join("blobs.sqlite");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        SqliteStorage::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_replaces_previous_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.put("a.png", Bytes::from_static(b"one")).await.unwrap();
        store.put("a.png", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(store.get("a.png").await.unwrap(), Some(Bytes::from_static(b"two")));
        let names: Vec<String> = store.names().try_collect().await.unwrap();
        assert_eq!(names, vec!["a.png".to_string()]);
    }

    #[tokio::test]
    async fn test_get_and_delete_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        assert_eq!(store.get("nope").await.unwrap(), None);
        assert!(!store.delete("nope").await.unwrap());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_overwrites_destination() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.put("src", Bytes::from_static(b"new")).await.unwrap();
        store.put("dst", Bytes::from_static(b"old")).await.unwrap();

        assert!(store.rename("src", "dst").await.unwrap());
        assert_eq!(store.get("dst").await.unwrap(), Some(Bytes::from_static(b"new")));
        assert!(!store.exists("src").await.unwrap());
        assert!(!store.rename("src", "dst").await.unwrap());
    }
}
