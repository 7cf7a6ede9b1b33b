use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::SearchConfig;
use crate::error::{AppError, Result};
use crate::models::{validate_logical_name, BlobKey, ImageCommand, ImageState};
use crate::services::thumbnail::{decode_upright, ImageProcessor};
use crate::storage::{collect_sorted, BlobStore};
use crate::vectors::VectorIndex;

/// Outcome of a bulk embedding pass
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReembedReport {
    pub embedded: usize,
    pub skipped: usize,
    /// Names whose stored original could not be decoded
    pub failed: Vec<String>,
}

/// Counts shown on the maintenance page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryStatus {
    pub storage: String,
    pub active: usize,
    pub trashed: usize,
    pub vectors: usize,
}

/// Image library workflow.
///
/// Keeps the blob store and the vector index in step for every lifecycle
/// transition. Mutating operations hold `gate` for their whole sequence so
/// they never interleave with each other inside this process.
pub struct LibraryService {
    blobs: BlobStore,
    vectors: Arc<dyn VectorIndex>,
    processor: ImageProcessor,
    search: SearchConfig,
    gate: Mutex<()>,
}

impl LibraryService {
    pub fn new(
        blobs: BlobStore,
        vectors: Arc<dyn VectorIndex>,
        processor: ImageProcessor,
        search: SearchConfig,
    ) -> Self {
        Self {
            blobs,
            vectors,
            processor,
            search,
            gate: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    // ==================== Lifecycle ====================

    /// Store an upload as the active record `name`, replacing any record of
    /// the same name.
    pub async fn upload(&self, name: &str, data: Bytes) -> Result<()> {
        validate_logical_name(name).map_err(AppError::BadRequest)?;

        let processor = self.processor;
        let (prepared, thumbnail) = run_blocking(move || {
            let prepared = processor.prepare_upload(&data)?;
            let thumbnail = processor.make_thumbnail(&prepared.original)?;
            Ok((prepared, thumbnail))
        })
        .await?;

        let _guard = self.gate.lock().await;

        // A name is never active and trashed at once; the upload wins
        if self.blobs.delete_record(name, ImageState::Trashed).await? {
            tracing::info!("Discarded trashed copy of {} replaced by upload", name);
        }

        self.blobs
            .put_blob(&BlobKey::original(name, ImageState::Active), prepared.original)
            .await?;
        self.blobs
            .put_blob(&BlobKey::thumbnail(name, ImageState::Active), thumbnail)
            .await?;
        self.vectors.upsert(name, &prepared.image).await?;

        tracing::info!(
            "Uploaded {} ({}x{})",
            name,
            prepared.image.width(),
            prepared.image.height()
        );
        Ok(())
    }

    /// Move an active record to the trash and drop its vector.
    /// Returns false when `name` is not active.
    pub async fn trash(&self, name: &str) -> Result<bool> {
        let _guard = self.gate.lock().await;

        if !self
            .blobs
            .move_record(name, ImageState::Active, ImageState::Trashed)
            .await?
        {
            return Ok(false);
        }

        if !self.vectors.remove(name).await? {
            tracing::debug!("{} had no vector when trashed", name);
        }

        tracing::info!("Moved {} to trash", name);
        Ok(true)
    }

    /// Bring a trashed record back and re-embed it.
    /// Returns false when `name` is not in the trash.
    pub async fn restore(&self, name: &str) -> Result<bool> {
        let _guard = self.gate.lock().await;

        if !self
            .blobs
            .move_record(name, ImageState::Trashed, ImageState::Active)
            .await?
        {
            return Ok(false);
        }

        let original = self
            .blobs
            .get_blob(&BlobKey::original(name, ImageState::Active))
            .await?
            .ok_or_else(|| AppError::Storage(format!("{} vanished during restore", name)))?;
        let image = run_blocking(move || decode_upright(&original)).await?;
        self.vectors.upsert(name, &image).await?;

        tracing::info!("Restored {} from trash", name);
        Ok(true)
    }

    /// Irreversibly delete a trashed record.
    /// Returns false when `name` is not in the trash.
    pub async fn purge(&self, name: &str) -> Result<bool> {
        let _guard = self.gate.lock().await;

        if !self
            .blobs
            .exists(&BlobKey::original(name, ImageState::Trashed))
            .await?
        {
            return Ok(false);
        }

        self.blobs.delete_record(name, ImageState::Trashed).await?;
        tracing::info!("Permanently deleted {}", name);
        Ok(true)
    }

    /// Apply a gallery/trash command; false when the image is not in the
    /// state the command needs.
    pub async fn dispatch(&self, name: &str, command: ImageCommand) -> Result<bool> {
        match command {
            ImageCommand::Delete => self.trash(name).await,
            ImageCommand::Restore => self.restore(name).await,
            ImageCommand::PurgeForever => self.purge(name).await,
        }
    }

    // ==================== Vector maintenance ====================

    /// Recompute the vector of every active image
    pub async fn reembed_all(&self) -> Result<ReembedReport> {
        self.embed_active(false).await
    }

    /// Embed only active images that have no vector yet
    pub async fn embed_missing(&self) -> Result<ReembedReport> {
        self.embed_active(true).await
    }

    async fn embed_active(&self, only_missing: bool) -> Result<ReembedReport> {
        let _guard = self.gate.lock().await;

        let names = collect_sorted(self.blobs.list_active_names()).await?;
        let total = names.len();
        let mut report = ReembedReport::default();

        for (i, name) in names.into_iter().enumerate() {
            if only_missing && self.vectors.exists(&name).await? {
                report.skipped += 1;
                continue;
            }

            let Some(original) = self
                .blobs
                .get_blob(&BlobKey::original(&name, ImageState::Active))
                .await?
            else {
                report.skipped += 1;
                continue;
            };

            match run_blocking(move || decode_upright(&original)).await {
                Ok(image) => {
                    self.vectors.upsert(&name, &image).await?;
                    report.embedded += 1;
                }
                Err(AppError::Decode(e)) => {
                    tracing::warn!("Cannot embed {}: {}", name, e);
                    report.failed.push(name);
                }
                Err(e) => return Err(e),
            }

            tracing::debug!("Embedding pass {}/{}", i + 1, total);
        }

        tracing::info!(
            "Embedding pass finished: {} embedded, {} skipped, {} failed",
            report.embedded,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    /// Remove vectors whose image is no longer active. Returns how many.
    pub async fn reconcile_vectors(&self) -> Result<usize> {
        let _guard = self.gate.lock().await;

        let active: HashSet<String> = collect_sorted(self.blobs.list_active_names())
            .await?
            .into_iter()
            .collect();

        let mut removed = 0;
        for id in self.vectors.ids().await? {
            if !active.contains(&id) && self.vectors.remove(&id).await? {
                tracing::info!("Removed orphaned vector {}", id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ==================== Reads ====================

    /// Up to `k` names ranked by similarity to `text`; `k` defaults from
    /// configuration and is capped at `max_k`.
    pub async fn search(&self, text: &str, k: Option<usize>) -> Result<Vec<String>> {
        let text = text.trim();
        let k = k.unwrap_or(self.search.default_k).min(self.search.max_k);
        if text.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.vectors.query(text, k).await
    }

    /// Where `name` currently lives, `None` when absent
    pub async fn state_of(&self, name: &str) -> Result<Option<ImageState>> {
        self.blobs.state_of(name).await
    }

    pub async fn list_gallery(&self) -> Result<Vec<String>> {
        collect_sorted(self.blobs.list_active_names()).await
    }

    pub async fn list_trash(&self) -> Result<Vec<String>> {
        collect_sorted(self.blobs.list_trash_names()).await
    }

    pub async fn load_original(&self, name: &str, state: ImageState) -> Result<Bytes> {
        self.blobs
            .get_blob(&BlobKey::original(name, state))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image not found: {}", name)))
    }

    /// Thumbnail of `name`, generated from the original and cached if missing
    pub async fn load_thumbnail(&self, name: &str, state: ImageState) -> Result<Bytes> {
        let key = BlobKey::thumbnail(name, state);
        if let Some(thumb) = self.blobs.get_blob(&key).await? {
            return Ok(thumb);
        }

        let original = self.load_original(name, state).await?;
        let source = original.clone();
        let processor = self.processor;
        let thumb = run_blocking(move || processor.make_thumbnail(&source)).await?;

        let _guard = self.gate.lock().await;
        if let Some(cached) = self.blobs.get_blob(&key).await? {
            return Ok(cached);
        }
        // Cache only while the original is still the bytes we thumbnailed
        let current = self.blobs.get_blob(&BlobKey::original(name, state)).await?;
        if current.as_ref() == Some(&original) {
            self.blobs.put_blob(&key, thumb.clone()).await?;
            tracing::debug!("Regenerated thumbnail for {}", name);
        } else {
            tracing::debug!("{} changed while its thumbnail was generated", name);
        }
        Ok(thumb)
    }

    pub async fn status(&self) -> Result<LibraryStatus> {
        Ok(LibraryStatus {
            storage: self.blobs.storage_type().to_string(),
            active: self.list_gallery().await?.len(),
            trashed: self.list_trash().await?.len(),
            vectors: self.vectors.count().await?,
        })
    }

    /// Close both stores
    pub async fn close(&self) {
        self.blobs.close().await;
        self.vectors.close().await;
    }
}

/// Run CPU-bound image work off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Image task failed: {}", e)))?
}
