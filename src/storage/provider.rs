use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

/// Storage provider trait
///
/// A flat namespace of byte payloads keyed by storage name.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store `data` under `name`, replacing any previous payload
    async fn put(&self, name: &str, data: Bytes) -> Result<()>;

    /// Fetch the payload stored under `name`, `None` if there is none
    async fn get(&self, name: &str) -> Result<Option<Bytes>>;

    /// Remove the payload under `name`; returns whether one existed
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Check if a payload exists
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Move the payload under `from` to `to`, replacing anything at `to`.
    /// Returns false when `from` does not exist.
    async fn rename(&self, from: &str, to: &str) -> Result<bool>;

    /// Every stored name, in store-defined order. Each call starts a fresh scan.
    fn names(&self) -> BoxStream<'_, Result<String>>;

    /// Release connections held by the provider
    async fn close(&self) {}

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
