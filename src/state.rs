use chrono::{DateTime, Utc};
use explorer_indexer::indexer::IndexerService;

/// Shared handler state / 全局共享状态
pub struct AppState {
    pub indexer: IndexerService,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(indexer: IndexerService) -> Self {
        Self {
            indexer,
            started_at: Utc::now(),
        }
    }

    /// Seconds since the server started / 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        Utc::now().signed_duration_since(self.started_at).num_seconds()
    }
}
