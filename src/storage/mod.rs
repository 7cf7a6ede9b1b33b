pub mod provider;
pub mod local;
pub mod sqlite;

pub use provider::*;
pub use local::*;
pub use sqlite::*;

use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use crate::models::{BlobKey, BlobVariant, ImageState};

/// Blob store adapter.
///
/// Wraps a [`StorageProvider`] and layers the image naming convention on top
/// of its flat namespace: listings only yield logical names, and records move
/// between the active and trashed namespaces as a unit.
#[derive(Clone)]
pub struct BlobStore {
    provider: Arc<dyn StorageProvider>,
}

impl BlobStore {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider }
    }

    /// Build the provider selected in configuration
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let provider: Arc<dyn StorageProvider> = match config.backend {
            StorageBackend::Sqlite => Arc::new(SqliteStorage::connect(&config.url).await?),
            StorageBackend::Local => Arc::new(LocalStorage::new(&config.local_path)),
        };
        tracing::info!("Blob store ready ({})", provider.storage_type());
        Ok(Self::new(provider))
    }

    pub fn storage_type(&self) -> &'static str {
        self.provider.storage_type()
    }

    pub async fn close(&self) {
        self.provider.close().await;
    }

    // ==================== Raw name access ====================

    pub async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        self.provider.put(name, data).await
    }

    pub async fn get(&self, name: &str) -> Result<Option<Bytes>> {
        self.provider.get(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.provider.delete(name).await
    }

    /// Logical names of every active original
    pub fn list_active_names(&self) -> BoxStream<'_, Result<String>> {
        self.names_in(ImageState::Active)
    }

    /// Logical names of every trashed original, suffix stripped
    pub fn list_trash_names(&self) -> BoxStream<'_, Result<String>> {
        self.names_in(ImageState::Trashed)
    }

    fn names_in(&self, state: ImageState) -> BoxStream<'_, Result<String>> {
        self.provider
            .names()
            .try_filter_map(move |stored| {
                let name = BlobKey::parse(&stored)
                    .filter(|key| key.state == state && key.variant == BlobVariant::Original)
                    .map(|key| key.name);
                future::ready(Ok(name))
            })
            .boxed()
    }

    // ==================== Typed access ====================

    pub async fn get_blob(&self, key: &BlobKey) -> Result<Option<Bytes>> {
        self.provider.get(&key.storage_name()).await
    }

    pub async fn put_blob(&self, key: &BlobKey, data: Bytes) -> Result<()> {
        self.provider.put(&key.storage_name(), data).await
    }

    pub async fn delete_blob(&self, key: &BlobKey) -> Result<bool> {
        self.provider.delete(&key.storage_name()).await
    }

    pub async fn exists(&self, key: &BlobKey) -> Result<bool> {
        self.provider.exists(&key.storage_name()).await
    }

    /// Current state of a logical name, `None` when absent from both namespaces
    pub async fn state_of(&self, name: &str) -> Result<Option<ImageState>> {
        for state in [ImageState::Active, ImageState::Trashed] {
            if self.exists(&BlobKey::original(name, state)).await? {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    /// Move original and thumbnail of `name` from one namespace to the other.
    /// Returns false when no original exists under `from`.
    pub async fn move_record(&self, name: &str, from: ImageState, to: ImageState) -> Result<bool> {
        let moved = self
            .provider
            .rename(
                &BlobKey::original(name, from).storage_name(),
                &BlobKey::original(name, to).storage_name(),
            )
            .await?;
        if !moved {
            return Ok(false);
        }

        let from_thumb = BlobKey::thumbnail(name, from).storage_name();
        let to_thumb = BlobKey::thumbnail(name, to).storage_name();
        if !self.provider.rename(&from_thumb, &to_thumb).await? {
            // A stale thumbnail at the destination would no longer match the original
            self.provider.delete(&to_thumb).await?;
            tracing::debug!("No thumbnail to move for {}", name);
        }
        Ok(true)
    }

    /// Remove original and thumbnail of `name` in `state`.
    /// Returns whether the original existed.
    pub async fn delete_record(&self, name: &str, state: ImageState) -> Result<bool> {
        let removed = self.delete_blob(&BlobKey::original(name, state)).await?;
        self.delete_blob(&BlobKey::thumbnail(name, state)).await?;
        Ok(removed)
    }
}

/// Drain a name stream into a sorted list
pub async fn collect_sorted(names: BoxStream<'_, Result<String>>) -> Result<Vec<String>> {
    let mut names: Vec<String> = names.try_collect().await?;
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One store per provider, both rooted in `dir`
    async fn stores(dir: &tempfile::TempDir) -> Vec<BlobStore> {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("blobs.sqlite").display());
        vec![
            BlobStore::new(Arc::new(LocalStorage::new(dir.path().join("blobs")))),
            BlobStore::new(Arc::new(SqliteStorage::connect(&url).await.unwrap())),
        ]
    }

    async fn seed(store: &BlobStore, names: &[&str]) {
        for name in names {
            store.put(name, Bytes::from(name.to_string())).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_listings_follow_naming_convention() {
        let dir = tempfile::tempdir().unwrap();
        for store in stores(&dir).await {
            seed(
                &store,
                &["cat.jpg", "cat.jpg_thumb", "dog.png_deleted", "dog.png_deleted_thumb", "owl.gif"],
            )
            .await;

            let active = collect_sorted(store.list_active_names()).await.unwrap();
            assert_eq!(active, vec!["cat.jpg", "owl.gif"], "{}", store.storage_type());

            let trash = collect_sorted(store.list_trash_names()).await.unwrap();
            assert_eq!(trash, vec!["dog.png"], "{}", store.storage_type());

            // Each call rescans
            assert_eq!(collect_sorted(store.list_active_names()).await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_move_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for store in stores(&dir).await {
            seed(&store, &["cat.jpg", "cat.jpg_thumb"]).await;

            assert!(store
                .move_record("cat.jpg", ImageState::Active, ImageState::Trashed)
                .await
                .unwrap());
            assert_eq!(store.get("cat.jpg").await.unwrap(), None);
            assert_eq!(
                store.get("cat.jpg_deleted_thumb").await.unwrap(),
                Some(Bytes::from("cat.jpg_thumb"))
            );
            assert_eq!(store.state_of("cat.jpg").await.unwrap(), Some(ImageState::Trashed));

            assert!(store
                .move_record("cat.jpg", ImageState::Trashed, ImageState::Active)
                .await
                .unwrap());
            assert_eq!(store.get("cat.jpg").await.unwrap(), Some(Bytes::from("cat.jpg")));
            assert_eq!(store.state_of("cat.jpg").await.unwrap(), Some(ImageState::Active));
        }
    }

    #[tokio::test]
    async fn test_move_record_without_original() {
        let dir = tempfile::tempdir().unwrap();
        for store in stores(&dir).await {
            seed(&store, &["cat.jpg_thumb"]).await;

            assert!(!store
                .move_record("cat.jpg", ImageState::Active, ImageState::Trashed)
                .await
                .unwrap());
            assert!(store.get("cat.jpg_thumb").await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_move_record_drops_stale_destination_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        for store in stores(&dir).await {
            seed(&store, &["a.png", "a.png_deleted_thumb"]).await;

            assert!(store
                .move_record("a.png", ImageState::Active, ImageState::Trashed)
                .await
                .unwrap());
            assert_eq!(store.get("a.png_deleted").await.unwrap(), Some(Bytes::from("a.png")));
            assert_eq!(store.get("a.png_deleted_thumb").await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_delete_record() {
        let dir = tempfile::tempdir().unwrap();
        for store in stores(&dir).await {
            seed(&store, &["a.png_deleted", "a.png_deleted_thumb"]).await;

            assert!(store.delete_record("a.png", ImageState::Trashed).await.unwrap());
            assert!(!store.delete_record("a.png", ImageState::Trashed).await.unwrap());
            assert_eq!(store.state_of("a.png").await.unwrap(), None);
        }
    }
}
