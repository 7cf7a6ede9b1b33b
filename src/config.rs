use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vectors: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_frontend_dir")]
    pub frontend_dir: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Which provider backs the blob store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "local" => Ok(StorageBackend::Local),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Connection string for the SQLite blob store
    #[serde(default = "default_storage_url")]
    pub url: String,
    /// Directory for the local blob store
    #[serde(default = "default_local_path")]
    pub local_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorConfig {
    /// File holding the persisted vector index
    #[serde(default = "default_vectors_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_thumb_height")]
    pub thumb_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1310
}

fn default_frontend_dir() -> String {
    "frontend".to_string()
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_storage_url() -> String {
    "sqlite:data/image_db.sqlite?mode=rwc".to_string()
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_vectors_path() -> String {
    "data/image_vecs.sqlite".to_string()
}

fn default_embedding_endpoint() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_thumb_height() -> u32 {
    220
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_k() -> usize {
    10
}

fn default_max_k() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            frontend_dir: default_frontend_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_storage_url(),
            local_path: default_local_path(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            path: default_vectors_path(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            thumb_height: default_thumb_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.normalize();
        config.ensure_directories()?;
        tracing::info!(
            "Storage backend={:?}, vectors={}, embedding endpoint={}",
            config.storage.backend,
            config.vectors.path,
            config.embedding.endpoint
        );
        Ok(config)
    }

    /// Load configuration from conf.ini or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["conf.ini", "config.toml", "data/conf.ini", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: PS_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(val) = lookup("PS_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(val) = lookup("PS_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Some(val) = lookup("PS_CONF_SERVER_FRONTEND_DIR") {
            self.server.frontend_dir = val;
        }
        if let Some(val) = lookup("PS_CONF_SERVER_MAX_UPLOAD_BYTES") {
            if let Ok(bytes) = val.parse() {
                self.server.max_upload_bytes = bytes;
            }
        }

        // Storage overrides
        if let Some(val) = lookup("PS_CONF_STORAGE_BACKEND") {
            match val.parse() {
                Ok(backend) => self.storage.backend = backend,
                Err(e) => tracing::warn!("Ignoring PS_CONF_STORAGE_BACKEND: {}", e),
            }
        }
        if let Some(val) = lookup("PS_CONF_STORAGE_URL") {
            if !val.trim().is_empty() {
                self.storage.url = val;
            }
        }
        if let Some(val) = lookup("PS_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }

        // Vector index overrides
        if let Some(val) = lookup("PS_CONF_VECTORS_PATH") {
            self.vectors.path = val;
        }

        // Embedding overrides
        if let Some(val) = lookup("PS_CONF_EMBEDDING_ENDPOINT") {
            if !val.trim().is_empty() {
                self.embedding.endpoint = val;
            }
        }
        if let Some(val) = lookup("PS_CONF_EMBEDDING_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.embedding.timeout_secs = secs;
            }
        }

        // Image overrides
        if let Some(val) = lookup("PS_CONF_IMAGES_THUMB_HEIGHT") {
            if let Ok(height) = val.parse() {
                self.images.thumb_height = height;
            }
        }
        if let Some(val) = lookup("PS_CONF_IMAGES_JPEG_QUALITY") {
            if let Ok(quality) = val.parse() {
                self.images.jpeg_quality = quality;
            }
        }

        // Search overrides
        if let Some(val) = lookup("PS_CONF_SEARCH_DEFAULT_K") {
            if let Ok(k) = val.parse() {
                self.search.default_k = k;
            }
        }
        if let Some(val) = lookup("PS_CONF_SEARCH_MAX_K") {
            if let Ok(k) = val.parse() {
                self.search.max_k = k;
            }
        }
    }

    /// Clamp values that would make the service unusable
    fn normalize(&mut self) {
        if self.images.thumb_height == 0 {
            self.images.thumb_height = default_thumb_height();
        }
        self.images.jpeg_quality = self.images.jpeg_quality.clamp(1, 100);
        self.search.max_k = self.search.max_k.max(1);
        self.search.default_k = self.search.default_k.clamp(1, self.search.max_k);
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(path) = sqlite_file_path(&self.storage.url) {
            if let Some(parent) = Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
        }

        if let Some(parent) = Path::new(&self.vectors.path).parent() {
            fs::create_dir_all(parent)?;
        }

        if self.storage.backend == StorageBackend::Local {
            fs::create_dir_all(&self.storage.local_path)?;
        }

        Ok(())
    }
}

/// Extract the file path from a `sqlite:` connection string, if it names one
fn sqlite_file_path(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.images.thumb_height, 220);
        assert_eq!(config.search.default_k, 10);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn test_toml_sections_are_optional() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            backend = "local"
            local_path = "/srv/blobs"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.storage.local_path, "/srv/blobs");
        assert_eq!(config.server.port, 1310);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PS_CONF_STORAGE_URL", "sqlite:/tmp/other.sqlite"),
            ("PS_CONF_SERVER_PORT", "8080"),
            ("PS_CONF_STORAGE_BACKEND", "nonsense"),
            ("PS_CONF_SEARCH_DEFAULT_K", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.url, "sqlite:/tmp/other.sqlite");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.search.default_k, 5);
    }

    #[test]
    fn test_normalize_clamps_search_bounds() {
        let mut config = Config::default();
        config.search.max_k = 0;
        config.search.default_k = 50;
        config.images.jpeg_quality = 0;
        config.normalize();
        assert_eq!(config.search.max_k, 1);
        assert_eq!(config.search.default_k, 1);
        assert_eq!(config.images.jpeg_quality, 1);
    }

    #[test]
    fn test_sqlite_file_path() {
        assert_eq!(
            sqlite_file_path("sqlite:data/image_db.sqlite?mode=rwc"),
            Some("data/image_db.sqlite")
        );
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
        assert_eq!(sqlite_file_path("postgres://x"), None);
    }
}
