use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use explorer_indexer::config;
use explorer_indexer::indexer::IndexerService;
use state::AppState;

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::server::health_check))
        // 搜索API
        .route("/api/search", post(api::search::search))
        // 索引API
        .route("/api/index/start", post(api::index::start_indexing))
        .route("/api/index/rebuild", post(api::index::rebuild_index))
        .route("/api/index/status", get(api::index::index_status))
        .route("/api/index/events", get(api::index::stream_events))
        // 文件浏览API
        .route("/api/fs/list", post(api::files::list_directory))
        .route("/api/fs/home", get(api::files::home_dir))
        .route("/api/fs/roots", get(api::files::available_roots))
        // 收藏夹API
        .route("/api/favorites", get(api::favorites::list_favorites))
        .route("/api/favorites", post(api::favorites::add_favorite))
        .route("/api/favorites/remove", post(api::favorites::remove_favorite))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "explorer_indexer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration / 加载配置
    config::init_config().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    let app_config = config::config();
    tracing::info!("Server will listen on {}:{}", app_config.server.host, app_config.server.port);

    // Create data directory if not exists / 创建数据目录
    let data_dir = app_config.get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!("Created data directory: {:?}", data_dir);
    }

    // Storage failures degrade the indexer instead of stopping the server / 存储打开失败时降级运行
    let indexer = match std::env::var("DATABASE_URL") {
        Ok(url) => IndexerService::open_url(app_config.indexer.clone(), &url).await,
        Err(_) => IndexerService::open(app_config.indexer.clone(), &app_config.get_database_path()).await,
    };

    // Initial scan of the home directory in background / 后台执行启动扫描
    let bootstrap = indexer.clone();
    tokio::spawn(async move {
        if let Err(e) = bootstrap.bootstrap().await {
            tracing::error!("Indexer bootstrap failed: {}", e);
        }
    });

    let state = Arc::new(AppState::new(indexer.clone()));
    let app = router(state);

    let bind_addr = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    indexer.shutdown().await;
    Ok(())
}
