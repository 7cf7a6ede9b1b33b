use serde::{Deserialize, Serialize};

/// Suffix marking a thumbnail payload in the blob store
pub const THUMB_SUFFIX: &str = "_thumb";
/// Suffix marking a trashed payload in the blob store
pub const TRASH_SUFFIX: &str = "_deleted";

/// Lifecycle state of an image record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    Active,
    Trashed,
}

/// Which payload of a record a blob holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobVariant {
    Original,
    Thumbnail,
}

/// Typed address of one payload in the blob store.
///
/// The persisted names are `<name>`, `<name>_thumb`, `<name>_deleted` and
/// `<name>_deleted_thumb`; only this type knows about the suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub name: String,
    pub state: ImageState,
    pub variant: BlobVariant,
}

impl BlobKey {
    pub fn new(name: impl Into<String>, state: ImageState, variant: BlobVariant) -> Self {
        Self {
            name: name.into(),
            state,
            variant,
        }
    }

    pub fn original(name: &str, state: ImageState) -> Self {
        Self::new(name, state, BlobVariant::Original)
    }

    pub fn thumbnail(name: &str, state: ImageState) -> Self {
        Self::new(name, state, BlobVariant::Thumbnail)
    }

    /// Name under which this payload is persisted
    pub fn storage_name(&self) -> String {
        let mut out = self.name.clone();
        if self.state == ImageState::Trashed {
            out.push_str(TRASH_SUFFIX);
        }
        if self.variant == BlobVariant::Thumbnail {
            out.push_str(THUMB_SUFFIX);
        }
        out
    }

    /// Inverse of [`BlobKey::storage_name`]
    pub fn parse(storage_name: &str) -> Option<Self> {
        let (rest, variant) = match storage_name.strip_suffix(THUMB_SUFFIX) {
            Some(rest) => (rest, BlobVariant::Thumbnail),
            None => (storage_name, BlobVariant::Original),
        };
        let (name, state) = match rest.strip_suffix(TRASH_SUFFIX) {
            Some(name) => (name, ImageState::Trashed),
            None => (rest, ImageState::Active),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, state, variant))
    }
}

/// Check that a logical name can be stored without colliding with the
/// suffix convention. Returns the reason on failure.
pub fn validate_logical_name(name: &str) -> std::result::Result<(), String> {
    if name.trim().is_empty() {
        return Err("Image name must not be empty".to_string());
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!("Invalid image name '{}'", name));
    }
    for suffix in [THUMB_SUFFIX, TRASH_SUFFIX] {
        if name.ends_with(suffix) {
            return Err(format!(
                "Image name '{}' must not end with reserved suffix '{}'",
                name, suffix
            ));
        }
    }
    Ok(())
}

/// Commands the gallery and trash views send for a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCommand {
    Delete,
    Restore,
    PurgeForever,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub action: ImageCommand,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResponse {
    pub name: String,
    pub action: ImageCommand,
}

/// Gallery or trash listing
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub state: ImageState,
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub uploaded: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub hits: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_names_are_bit_exact() {
        let cases = [
            (ImageState::Active, BlobVariant::Original, "cat.jpg"),
            (ImageState::Active, BlobVariant::Thumbnail, "cat.jpg_thumb"),
            (ImageState::Trashed, BlobVariant::Original, "cat.jpg_deleted"),
            (ImageState::Trashed, BlobVariant::Thumbnail, "cat.jpg_deleted_thumb"),
        ];
        for (state, variant, expected) in cases {
            let key = BlobKey::new("cat.jpg", state, variant);
            assert_eq!(key.storage_name(), expected);
            assert_eq!(BlobKey::parse(expected), Some(key));
        }
    }

    #[test]
    fn test_parse_rejects_bare_suffix() {
        assert_eq!(BlobKey::parse("_thumb"), None);
        assert_eq!(BlobKey::parse("_deleted_thumb"), None);
    }

    #[test]
    fn test_reserved_suffixes_are_rejected() {
        assert!(validate_logical_name("holiday.png").is_ok());
        assert!(validate_logical_name("holiday_deleted").is_err());
        assert!(validate_logical_name("holiday_thumb").is_err());
        assert!(validate_logical_name("a/b.png").is_err());
        assert!(validate_logical_name("  ").is_err());
    }

    #[test]
    fn test_command_wire_format() {
        let req: CommandRequest = serde_json::from_str(r#"{"action":"purge_forever"}"#).unwrap();
        assert_eq!(req.action, ImageCommand::PurgeForever);
        assert!(serde_json::from_str::<CommandRequest>(r#"{"action":"explode"}"#).is_err());
    }
}
