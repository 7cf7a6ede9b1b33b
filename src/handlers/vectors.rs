use axum::{extract::State, Json};

use crate::error::{ApiResponse, Result};
use crate::models::ReconcileResponse;
use crate::services::{LibraryStatus, ReembedReport};
use crate::AppState;

/// GET /api/v1/vectors/status
pub async fn status(State(state): State<AppState>) -> Result<Json<ApiResponse<LibraryStatus>>> {
    let status = state.library.status().await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Recompute every active image's vector
/// POST /api/v1/vectors/reembed
pub async fn reembed(State(state): State<AppState>) -> Result<Json<ApiResponse<ReembedReport>>> {
    let report = state.library.reembed_all().await?;
    Ok(Json(ApiResponse::success(report)))
}

/// Embed active images that have no vector yet
/// POST /api/v1/vectors/embed-missing
pub async fn embed_missing(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ReembedReport>>> {
    let report = state.library.embed_missing().await?;
    Ok(Json(ApiResponse::success(report)))
}

/// Drop vectors of images that are no longer active
/// POST /api/v1/vectors/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ReconcileResponse>>> {
    let removed = state.library.reconcile_vectors().await?;
    Ok(Json(ApiResponse::success(ReconcileResponse { removed })))
}
