use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use image::DynamicImage;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::db::Database;
use crate::error::Result;
use crate::vectors::{cosine_similarity, Embedder, VectorIndex};

/// Vector index persisted in its own SQLite file, searched by brute force
pub struct SqliteVectorIndex {
    db: Database,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorIndex {
    pub async fn new(db: Database, embedder: Arc<dyn Embedder>) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(db.pool())
        .await?;

        Ok(Self { db, embedder })
    }

    /// Open (creating if needed) the index file at `path`
    pub async fn open(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let db = Database::open_file(path).await?;
        let index = Self::new(db, embedder).await?;
        tracing::info!("Vector index opened at {}", path);
        Ok(index)
    }

    /// Store a precomputed vector
    pub async fn put_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO vectors (id, dims, embedding, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(vector.len() as i64)
        .bind(encode_vector(vector))
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, id: &str, image: &DynamicImage) -> Result<()> {
        let vector = self.embedder.embed_image(image).await?;
        self.put_vector(id, &vector).await?;
        tracing::debug!("Upserted {}-d vector for {}", vector.len(), id);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vectors WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>> {
        if k == 0 || self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let target = self.embedder.embed_text(text).await?;

        let mut scored: Vec<(f32, String)> = Vec::new();
        let mut rows = sqlx::query_as::<_, (String, Vec<u8>)>("SELECT id, embedding FROM vectors")
            .fetch(self.db.pool());

        while let Some((id, bytes)) = rows.try_next().await? {
            let score = decode_vector(&bytes).and_then(|v| cosine_similarity(&target, &v));
            match score {
                Some(score) => scored.push((score, id)),
                None => tracing::warn!("Skipping vector for {}: incompatible with query", id),
            }
        }

        scored.sort_by(|a, b| match b.0.total_cmp(&a.0) {
            Ordering::Equal => a.1.cmp(&b.1),
            other => other,
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE id = ?")
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;

        Ok(count > 0)
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM vectors ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;

        Ok(ids)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(self.db.pool())
            .await?;

        Ok(count as usize)
    }

    async fn close(&self) {
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::testing::ColorEmbedder;
    use image::{Rgb, RgbImage};

    async fn open_index(dir: &tempfile::TempDir) -> SqliteVectorIndex {
        let path = dir.path().join("vecs.sqlite");
        SqliteVectorIndex::open(path.to_str().unwrap(), Arc::new(ColorEmbedder::default()))
            .await
            .unwrap()
    }

    fn solid(color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(color)))
    }

    #[test]
    fn test_vector_encoding() {
        let v = vec![1.5f32, -0.25, 0.0];
        assert_eq!(decode_vector(&encode_vector(&v)), Some(v));
        assert_eq!(decode_vector(&[0, 1, 2]), None);
    }

    #[tokio::test]
    async fn test_query_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        assert!(index.query("red", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;

        index.upsert("red.png", &solid([250, 10, 10])).await.unwrap();
        index.upsert("blue.png", &solid([10, 10, 250])).await.unwrap();
        index.upsert("purple.png", &solid([160, 0, 200])).await.unwrap();

        assert_eq!(
            index.query("something blue", 10).await.unwrap(),
            vec!["blue.png", "purple.png", "red.png"]
        );
        assert_eq!(index.query("red", 1).await.unwrap(), vec!["red.png"]);
        assert!(index.query("red", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_remove_reports() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;

        index.upsert("x", &solid([255, 0, 0])).await.unwrap();
        index.upsert("x", &solid([0, 0, 255])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.query("blue", 1).await.unwrap(), vec!["x"]);

        assert!(index.exists("x").await.unwrap());
        assert!(index.remove("x").await.unwrap());
        assert!(!index.remove("x").await.unwrap());
        assert!(!index.exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_mismatched_dimensions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;

        index.put_vector("old-model", &[1.0, 0.0]).await.unwrap();
        index.upsert("new-model", &solid([255, 0, 0])).await.unwrap();

        assert_eq!(index.query("red", 10).await.unwrap(), vec!["new-model"]);
        assert_eq!(index.ids().await.unwrap(), vec!["new-model", "old-model"]);
    }
}
