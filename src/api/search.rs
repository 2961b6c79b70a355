use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use explorer_indexer::search::SearchHit;

use super::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
}

/// Search the catalog; faults come back as an empty list / 搜索文件
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Json<ApiResponse<SearchResponse>> {
    let results = state.indexer.search(&req.query).await;
    tracing::debug!("Search {:?} returned {} result(s)", req.query, results.len());

    Json(ApiResponse::success(SearchResponse {
        total: results.len(),
        results,
    }))
}
