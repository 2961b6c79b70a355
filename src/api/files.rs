use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use explorer_indexer::config;
use explorer_indexer::models::{DirEntry, RootEntry};

use super::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct HomeResponse {
    pub path: String,
}

/// List a directory, lazily indexing it one level deep / 列出目录
pub async fn list_directory(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListRequest>,
) -> Json<ApiResponse<Vec<DirEntry>>> {
    let dir = PathBuf::from(&req.path);
    match state.indexer.list_directory(&dir).await {
        Ok(entries) => Json(ApiResponse::success(entries)),
        Err(e) => {
            tracing::warn!("Failed to list directory {:?}: {}", dir, e);
            Json(ApiResponse::error_with(&e.to_string(), Vec::new()))
        }
    }
}

/// Home directory of the current user / 用户主目录
pub async fn home_dir() -> Json<ApiResponse<HomeResponse>> {
    Json(ApiResponse::success(HomeResponse {
        path: config::home_dir().to_string_lossy().into_owned(),
    }))
}

/// Drives (Windows) or the filesystem root / 可用根目录
pub async fn available_roots(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<RootEntry>>> {
    Json(ApiResponse::success(state.indexer.available_roots().await))
}
