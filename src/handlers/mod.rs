pub mod gallery;
pub mod search;
pub mod trash;
pub mod vectors;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;

use crate::error::{AppError, Result};

/// Raw image payload with a content type sniffed from its bytes
pub(crate) fn image_response(data: Bytes) -> Result<Response> {
    let content_type = image::guess_format(&data)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
