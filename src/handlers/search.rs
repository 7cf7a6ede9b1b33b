use axum::{
    extract::{Query, State},
    Json,
};

use crate::error::{ApiResponse, Result};
use crate::models::{SearchQuery, SearchResponse};
use crate::AppState;

/// Free-text search over image embeddings
/// GET /api/v1/search?q=xxx&k=10
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<SearchResponse>>> {
    let hits = state.library.search(&query.q, query.k).await?;
    tracing::debug!("Search {:?} returned {} hit(s)", query.q, hits.len());
    Ok(Json(ApiResponse::success(SearchResponse {
        query: query.q,
        hits,
    })))
}
