use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::StorageProvider;

const STAGING_DIR: &str = ".staging";

/// Local file system storage provider.
///
/// Each payload is one file directly under `base_path`; the file name is the
/// percent-encoded storage name, so any string maps to a single path segment.
pub struct LocalStorage {
    base_path: PathBuf,
}

enum Scan {
    Start(PathBuf),
    Reading(fs::ReadDir),
    Done,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_full_path(&self, name: &str) -> PathBuf {
        self.base_path.join(encode_name(name))
    }

    async fn write_staged(&self, data: &[u8]) -> Result<PathBuf> {
        let staging = self.base_path.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;

        let temp_path = staging.join(Uuid::new_v4().to_string());
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(temp_path)
    }
}

/// Map a storage name to a file name that never contains a separator
/// and never starts with a dot.
fn encode_name(name: &str) -> String {
    let encoded = urlencoding::encode(name).into_owned();
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded,
    }
}

fn decode_name(file_name: &str) -> Option<String> {
    urlencoding::decode(file_name).ok().map(|s| s.into_owned())
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        let full_path = self.get_full_path(name);

        // Write next to the target, then swap it in
        let temp_path = self.write_staged(&data).await?;
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(AppError::Storage(format!("Failed to store {}: {}", name, e)));
        }

        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Bytes>> {
        let full_path = self.get_full_path(name);

        match fs::read(&full_path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(format!("Failed to read {}: {}", name, e))),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let full_path = self.get_full_path(name);

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted blob {:?}", full_path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Storage(format!("Failed to delete {}: {}", name, e))),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(fs::try_exists(self.get_full_path(name)).await?)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let from_path = self.get_full_path(from);
        let to_path = self.get_full_path(to);

        match fs::rename(&from_path, &to_path).await {
            Ok(()) => {
                tracing::debug!("Moved blob {:?} -> {:?}", from_path, to_path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to move {} to {}: {}",
                from, to, e
            ))),
        }
    }

    fn names(&self) -> BoxStream<'_, Result<String>> {
        stream::unfold(Scan::Start(self.base_path.clone()), |scan| async move {
            let mut dir = match scan {
                Scan::Done => return None,
                Scan::Reading(dir) => dir,
                Scan::Start(base) => match fs::read_dir(&base).await {
                    Ok(dir) => dir,
                    Err(e) if e.kind() == ErrorKind::NotFound => return None,
                    Err(e) => return Some((Err(AppError::Io(e)), Scan::Done)),
                },
            };

            loop {
                let entry = match dir.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => return None,
                    Err(e) => return Some((Err(AppError::Io(e)), Scan::Done)),
                };

                match entry.file_type().await {
                    Ok(kind) if kind.is_file() => {}
                    Ok(_) => continue,
                    Err(e) => return Some((Err(AppError::Io(e)), Scan::Done)),
                }

                let file_name = entry.file_name();
                match file_name.to_str().and_then(decode_name) {
                    Some(name) => return Some((Ok(name), Scan::Reading(dir))),
                    None => {
                        tracing::warn!("Skipping unrecognised file {:?} in blob directory", file_name);
                    }
                }
            }
        })
        .boxed()
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}
