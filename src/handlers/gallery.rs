use axum::{
    extract::{Multipart, Path, State},
    response::Response,
    Json,
};

use crate::error::{ApiResponse, AppError, Result};
use crate::handlers::image_response;
use crate::models::{
    CommandRequest, CommandResponse, ImageCommand, ImageListResponse, ImageState, UploadResponse,
};
use crate::AppState;

/// List the gallery
/// GET /api/v1/images
pub async fn list_images(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ImageListResponse>>> {
    let names = state.library.list_gallery().await?;
    Ok(Json(ApiResponse::success(ImageListResponse {
        state: ImageState::Active,
        names,
    })))
}

/// Upload one or more images, each in a `file` field
/// POST /api/v1/images
pub async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>> {
    let mut uploaded = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;
        let data = field.bytes().await.map_err(|e| {
            AppError::BadRequest(format!("Failed to read {}: {}", file_name, e))
        })?;

        state.library.upload(&file_name, data).await?;
        uploaded.push(file_name);
    }

    if uploaded.is_empty() {
        return Err(AppError::BadRequest("No file provided".to_string()));
    }

    tracing::info!("Upload request stored {} image(s)", uploaded.len());
    Ok(Json(ApiResponse::success(UploadResponse { uploaded })))
}

/// Full-size active image
/// GET /api/v1/images/:name
pub async fn get_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let data = state.library.load_original(&name, ImageState::Active).await?;
    image_response(data)
}

/// Thumbnail of an active image
/// GET /api/v1/images/:name/thumb
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let data = state.library.load_thumbnail(&name, ImageState::Active).await?;
    image_response(data)
}

/// Apply a gallery or trash command to one image
/// POST /api/v1/images/:name/command
pub async fn run_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<ApiResponse<CommandResponse>>> {
    if !state.library.dispatch(&name, req.action).await? {
        let message = match state.library.state_of(&name).await? {
            Some(ImageState::Active) => format!("{} is not in the trash", name),
            Some(ImageState::Trashed) => format!("{} is already in the trash", name),
            None => format!("Image not found: {}", name),
        };
        return Err(AppError::NotFound(message));
    }

    let message = match req.action {
        ImageCommand::Delete => "Moved to trash",
        ImageCommand::Restore => "Restored",
        ImageCommand::PurgeForever => "Permanently deleted",
    };

    Ok(Json(ApiResponse::with_message(
        message,
        CommandResponse {
            name,
            action: req.action,
        },
    )))
}
