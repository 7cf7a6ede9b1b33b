use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};

use crate::error::{ApiResponse, Result};
use crate::handlers::image_response;
use crate::models::{ImageListResponse, ImageState};
use crate::AppState;

/// List trashed images
/// GET /api/v1/trash
pub async fn list_trash(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ImageListResponse>>> {
    let names = state.library.list_trash().await?;
    Ok(Json(ApiResponse::success(ImageListResponse {
        state: ImageState::Trashed,
        names,
    })))
}

/// Thumbnail of a trashed image
/// GET /api/v1/trash/:name/thumb
pub async fn get_trash_thumbnail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let data = state.library.load_thumbnail(&name, ImageState::Trashed).await?;
    image_response(data)
}
