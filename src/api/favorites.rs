use axum::{extract::State, Json};
use serde::Deserialize;
use std::sync::Arc;

use explorer_indexer::models::FavoriteEntry;

use super::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddFavoriteRequest {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveFavoriteRequest {
    pub path: String,
}

pub async fn list_favorites(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<FavoriteEntry>>> {
    Json(ApiResponse::success(state.indexer.get_favorites().await))
}

/// Add a favorite and return the updated list / 添加收藏
pub async fn add_favorite(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddFavoriteRequest>,
) -> Json<ApiResponse<Vec<FavoriteEntry>>> {
    match state.indexer.add_favorite(&req.path, &req.name).await {
        Ok(favorites) => Json(ApiResponse::success(favorites)),
        Err(e) => {
            tracing::warn!("Failed to add favorite {}: {}", req.path, e);
            Json(ApiResponse::error(&e.to_string()))
        }
    }
}

/// Remove a favorite and return the updated list / 删除收藏
pub async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveFavoriteRequest>,
) -> Json<ApiResponse<Vec<FavoriteEntry>>> {
    match state.indexer.remove_favorite(&req.path).await {
        Ok(favorites) => Json(ApiResponse::success(favorites)),
        Err(e) => {
            tracing::warn!("Failed to remove favorite {}: {}", req.path, e);
            Json(ApiResponse::error(&e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::state_for;

    #[tokio::test]
    async fn test_add_then_remove() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let state = state_for(files.path(), data.path()).await;

        let Json(resp) = add_favorite(
            State(state.clone()),
            Json(AddFavoriteRequest {
                path: "/srv/projects".to_string(),
                name: "Projects".to_string(),
            }),
        )
        .await;
        assert_eq!(resp.data.unwrap().len(), 1);

        let Json(resp) = list_favorites(State(state.clone())).await;
        assert_eq!(resp.data.unwrap()[0].name, "Projects");

        let Json(resp) = remove_favorite(
            State(state),
            Json(RemoveFavoriteRequest {
                path: "/srv/projects".to_string(),
            }),
        )
        .await;
        assert!(resp.data.unwrap().is_empty());
    }
}
