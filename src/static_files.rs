use std::path::Path;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_status::SetStatus;

/// Serve the frontend directory; unknown paths fall back to its index.html
pub fn spa_service(dir: impl AsRef<Path>) -> ServeDir<SetStatus<ServeFile>> {
    let dir = dir.as_ref();
    ServeDir::new(dir).not_found_service(ServeFile::new(dir.join("index.html")))
}
