use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use explorer_indexer::indexer::ServiceStatus;
use explorer_indexer::models::{IndexingStatus, WatchDepth};
use explorer_indexer::IndexerError;

use super::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartIndexRequest {
    pub path: String,
    /// Levels below `path`, absent means unlimited / 深度（缺省为不限）
    #[serde(default)]
    pub depth: Option<u32>,
    /// Return immediately instead of waiting for the initial scan / 后台执行
    #[serde(default)]
    pub background: bool,
}

/// Start indexing a directory / 开始索引目录
pub async fn start_indexing(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartIndexRequest>,
) -> Json<ApiResponse<()>> {
    let root = PathBuf::from(&req.path);
    let depth = WatchDepth::from(req.depth);

    if req.background {
        let indexer = state.indexer.clone();
        tokio::spawn(async move {
            if let Err(e) = indexer.start_indexing(&root, depth).await {
                tracing::warn!("Indexing {:?} failed: {}", root, e);
            }
        });
        return Json(ApiResponse::success(()));
    }

    match state.indexer.start_indexing(&root, depth).await {
        Ok(()) => Json(ApiResponse::success(())),
        Err(e) => {
            tracing::warn!("Indexing {:?} failed: {}", root, e);
            Json(ApiResponse::error(&e.to_string()))
        }
    }
}

/// Clear the index and rescan the configured root / 重建索引
pub async fn rebuild_index(State(state): State<Arc<AppState>>) -> Json<ApiResponse<()>> {
    match state.indexer.rebuild().await {
        Ok(()) => Json(ApiResponse::success(())),
        Err(IndexerError::Busy) => Json(ApiResponse::error(&IndexerError::Busy.to_string())),
        Err(e) => Json(ApiResponse::error(&format!("Rebuild failed: {}", e))),
    }
}

/// Current indexing status / 索引状态
pub async fn index_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ServiceStatus>> {
    Json(ApiResponse::success(state.indexer.status().await))
}

/// Progress stream, starting with the latest status / 进度推送（SSE）
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let latest = state.indexer.progress().latest();
    let updates = BroadcastStream::new(state.indexer.subscribe()).filter_map(|message| message.ok());

    let stream = tokio_stream::once(latest)
        .chain(updates)
        .filter_map(|status: IndexingStatus| {
            Event::default()
                .event("indexing-status")
                .json_data(&status)
                .ok()
                .map(Ok)
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::state_for;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_then_status() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(files.path().join("a.txt"), b"a").unwrap();
        let state = state_for(files.path(), data.path()).await;

        let Json(resp) = start_indexing(
            State(state.clone()),
            Json(StartIndexRequest {
                path: files.path().to_string_lossy().into_owned(),
                depth: Some(0),
                background: false,
            }),
        )
        .await;
        assert_eq!(resp.code, 200);

        let Json(resp) = index_status(State(state)).await;
        let status = resp.data.unwrap();
        assert!(status.available);
        assert_eq!(status.stats.file_count, 1);
        assert_eq!(status.watched_roots.len(), 1);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_directory() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let state = state_for(files.path(), data.path()).await;

        let Json(resp) = start_indexing(
            State(state),
            Json(StartIndexRequest {
                path: files.path().join("nope").to_string_lossy().into_owned(),
                depth: None,
                background: false,
            }),
        )
        .await;
        assert_eq!(resp.code, 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rebuild_ends_ready() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(files.path().join("keep.txt"), b"k").unwrap();
        let state = state_for(files.path(), data.path()).await;

        let Json(resp) = rebuild_index(State(state.clone())).await;
        assert_eq!(resp.code, 200);
        assert_eq!(state.indexer.progress().latest().message, "Ready");
        assert_eq!(state.indexer.search("keep").await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_rebuild_is_refused() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        for i in 0..200 {
            std::fs::write(files.path().join(format!("f{}.txt", i)), b"x").unwrap();
        }
        let state = state_for(files.path(), data.path()).await;

        let (first, second) = tokio::join!(
            rebuild_index(State(state.clone())),
            rebuild_index(State(state.clone()))
        );
        let mut codes = vec![first.0.code, second.0.code];
        codes.sort();
        assert_eq!(codes, vec![200, 400]);
        let refused = if first.0.code == 400 { first.0 } else { second.0 };
        assert_eq!(refused.message, "Index rebuild already in progress");
    }
}
