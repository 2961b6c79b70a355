//! Indexer service / 索引服务
//!
//! One explicit instance owns the catalog, watch table, scheduler and progress channel.
//! Handlers receive it through `AppState`; tests build as many independent instances as
//! they need.
//!
//! Lifecycle: Idle → Resetting → Scanning → Idle. When the store cannot be opened the service
//! runs degraded: search returns nothing and indexing is inert.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::ignore::IgnorePolicy;
use super::scheduler::BatchScheduler;
use super::watcher::{WatchEvent, WatchManager};
use crate::config::IndexerConfig;
use crate::error::{IndexerError, Result};
use crate::favorites::FavoritesStore;
use crate::models::{DirEntry, FavoriteEntry, IndexingStatus, LifecycleState, RootEntry, WatchDepth};
use crate::progress::ProgressChannel;
use crate::search::{CatalogStore, IndexStats, QueryEngine, SearchHit};

const LIST_CHUNK_SIZE: usize = 50;

/// Snapshot returned by `status()` / 索引状态快照
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub available: bool,
    pub state: LifecycleState,
    pub status: IndexingStatus,
    pub stats: IndexStats,
    pub watched_roots: Vec<String>,
}

struct IndexCore {
    catalog: Arc<CatalogStore>,
    query: QueryEngine,
    favorites: FavoritesStore,
    watcher: WatchManager,
    scheduler: BatchScheduler,
}

struct ServiceInner {
    config: IndexerConfig,
    progress: Arc<ProgressChannel>,
    core: Option<IndexCore>,
    state: RwLock<LifecycleState>,
    reset_lock: tokio::sync::Mutex<()>,
    active_scans: AtomicUsize,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

#[derive(Clone)]
pub struct IndexerService {
    inner: Arc<ServiceInner>,
}

impl IndexerService {
    /// Open the index database at `db_path`, degrading on failure / 打开索引（失败则降级）
    pub async fn open(config: IndexerConfig, db_path: &Path) -> Self {
        match crate::db::open_pool(db_path).await {
            Ok(pool) => Self::from_pool(config, pool),
            Err(e) => {
                tracing::error!("Failed to initialize database at {:?}: {}", db_path, e);
                Self::degraded(config)
            }
        }
    }

    /// Open from a `sqlite:` URL / 通过URL打开
    pub async fn open_url(config: IndexerConfig, url: &str) -> Self {
        match crate::db::open_url(url).await {
            Ok(pool) => Self::from_pool(config, pool),
            Err(e) => {
                tracing::error!("Failed to initialize database {}: {}", url, e);
                Self::degraded(config)
            }
        }
    }

    /// Build on an already migrated pool; must run inside a tokio runtime
    pub fn from_pool(config: IndexerConfig, pool: SqlitePool) -> Self {
        let progress = Arc::new(ProgressChannel::new());
        let ignore = IgnorePolicy::new(&config.extra_ignore).unwrap_or_else(|e| {
            tracing::warn!("{}, using built-in ignore rules only", e);
            IgnorePolicy::builtin()
        });

        let catalog = Arc::new(CatalogStore::new(pool.clone()));
        let scheduler = BatchScheduler::new(
            catalog.clone(),
            progress.clone(),
            config.batch_size,
            config.flush_delay(),
        );
        let (watcher, events) = WatchManager::new(ignore);
        let pump = tokio::spawn(pump_events(scheduler.clone(), events));

        let core = IndexCore {
            query: QueryEngine::new(pool.clone(), config.max_results),
            favorites: FavoritesStore::new(pool),
            catalog,
            watcher,
            scheduler,
        };

        Self {
            inner: Arc::new(ServiceInner {
                config,
                progress,
                core: Some(core),
                state: RwLock::new(LifecycleState::Idle),
                reset_lock: tokio::sync::Mutex::new(()),
                active_scans: AtomicUsize::new(0),
                pump: Mutex::new(Some(pump)),
            }),
        }
    }

    /// Service without a store / 无存储的降级服务
    pub fn degraded(config: IndexerConfig) -> Self {
        let progress = Arc::new(ProgressChannel::new());
        progress.publish_message(false, "Error initializing");
        Self {
            inner: Arc::new(ServiceInner {
                config,
                progress,
                core: None,
                state: RwLock::new(LifecycleState::Idle),
                reset_lock: tokio::sync::Mutex::new(()),
                active_scans: AtomicUsize::new(0),
                pump: Mutex::new(None),
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.core.is_some()
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.read()
    }

    pub fn progress(&self) -> Arc<ProgressChannel> {
        self.inner.progress.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexingStatus> {
        self.inner.progress.subscribe()
    }

    pub fn catalog(&self) -> Option<Arc<CatalogStore>> {
        self.inner.core.as_ref().map(|core| core.catalog.clone())
    }

    fn core(&self) -> Result<&IndexCore> {
        self.inner.core.as_ref().ok_or(IndexerError::Unavailable)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.inner.state.write() = state;
    }

    fn publish(&self, is_indexing: bool, message: &str) {
        self.inner.progress.publish_message(is_indexing, message);
    }

    /// Startup scan of the configured root / 启动时扫描
    ///
    /// An empty catalog is a cold start and the call waits for the full scan. Otherwise the
    /// scan runs in the background and the call returns at once.
    pub async fn bootstrap(&self) -> Result<()> {
        let core = match self.core() {
            Ok(core) => core,
            Err(e) => {
                self.publish(false, "Error initializing");
                return Err(e);
            }
        };

        self.publish(true, "Starting Indexer...");
        let root = self.inner.config.root_path();

        let has_data = match core.catalog.has_any().await {
            Ok(has_data) => has_data,
            Err(e) => {
                tracing::warn!("Failed to check file count: {}", e);
                false
            }
        };
        self.inner.progress.set_background(has_data);

        if has_data {
            tracing::info!("Index already exists, starting background update of {:?}", root);
            self.publish(false, "Checking for changes...");
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.start_indexing(&root, WatchDepth::Deep).await {
                    tracing::error!("Background update of {:?} failed: {}", root, e);
                }
            });
            return Ok(());
        }

        tracing::info!("First run, performing initial index of {:?}", root);
        if let Err(e) = self.start_indexing(&root, WatchDepth::Deep).await {
            tracing::error!("Initial index of {:?} failed: {}", root, e);
            self.publish(false, "Error initializing");
            return Err(e);
        }
        Ok(())
    }

    /// Watch and index `root`; resolves once its initial scan is searchable / 索引目录
    ///
    /// Publishes a scanning status on start. "Ready" follows when the last scan in flight
    /// finishes, so overlapping scans report one completion.
    pub async fn start_indexing(&self, root: &Path, depth: WatchDepth) -> Result<()> {
        let core = self.core()?;
        let epoch = core.scheduler.current_epoch();

        self.inner.active_scans.fetch_add(1, Ordering::SeqCst);
        let is_indexing = !self.inner.progress.is_background();
        self.publish(is_indexing, &format!("Scanning {}...", root.display()));

        let result = core.watcher.start_watch(root, depth, epoch).await;

        let remaining = self.inner.active_scans.fetch_sub(1, Ordering::SeqCst) - 1;
        match &result {
            Ok(()) if remaining == 0 => self.publish(false, "Ready"),
            Ok(()) => {}
            Err(e) => {
                tracing::warn!("Scan of {:?} failed: {}", root, e);
                if remaining == 0 {
                    self.publish(false, &format!("Failed to index {}", root.display()));
                }
            }
        }
        result
    }

    /// Ranked search, empty on any fault / 搜索
    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        match self.core() {
            Ok(core) => core.query.search(query).await,
            Err(_) => Vec::new(),
        }
    }

    /// Stop every watch and empty the index / 重置索引
    ///
    /// Resolves with the catalog empty and the state at Scanning. The returned [`Rescan`]
    /// repopulates from the configured root; dropping it unrun leaves the index empty and
    /// returns the service to Idle.
    pub async fn reset(&self) -> Result<Rescan> {
        let core = self.core()?;
        let _guard = self.inner.reset_lock.lock().await;
        self.reset_locked(core).await
    }

    /// Reset and wait for the rescan / 重建索引
    ///
    /// Fails with [`IndexerError::Busy`] while another rebuild is running.
    pub async fn rebuild(&self) -> Result<()> {
        let core = match self.core() {
            Ok(core) => core,
            Err(e) => {
                self.publish(false, "Rebuild failed");
                return Err(e);
            }
        };
        let Ok(_guard) = self.inner.reset_lock.try_lock() else {
            return Err(IndexerError::Busy);
        };

        let result = match self.reset_locked(core).await {
            Ok(rescan) => {
                self.publish(true, "Rescanning...");
                rescan.run().await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::error!("Rebuild failed: {}", e);
            self.publish(false, "Rebuild failed");
        }
        result
    }

    async fn reset_locked(&self, core: &IndexCore) -> Result<Rescan> {
        tracing::info!("Resetting index...");
        self.set_state(LifecycleState::Resetting);
        self.publish(true, "Clearing index...");

        // Supersede first so nothing from the old watches can land after the clear
        let epoch = core.scheduler.reset().await;
        core.watcher.stop_all().await;

        if let Err(e) = core.catalog.clear_all().await {
            tracing::error!("Failed to clear index: {}", e);
            self.set_state(LifecycleState::Idle);
            self.publish(false, "Failed to clear index");
            return Err(e);
        }
        self.inner.progress.reset_count();
        self.inner.progress.set_background(false);
        tracing::info!("Index cleared");

        self.set_state(LifecycleState::Scanning);
        self.publish(true, "Index cleared");
        Ok(Rescan {
            service: self.clone(),
            root: self.inner.config.root_path(),
            epoch,
            started: false,
        })
    }

    /// Top-level locations the GUI can browse / 可用根目录
    ///
    /// Drive letters that answer a stat on Windows, the filesystem root elsewhere.
    pub async fn available_roots(&self) -> Vec<RootEntry> {
        if cfg!(windows) {
            let mut roots = Vec::new();
            for letter in 'A'..='Z' {
                let path = format!("{}:\\", letter);
                if tokio::fs::metadata(&path).await.is_ok() {
                    roots.push(RootEntry {
                        name: format!("Local Disk ({}:)", letter),
                        path,
                    });
                }
            }
            roots
        } else {
            vec![RootEntry {
                name: "Root".to_string(),
                path: "/".to_string(),
            }]
        }
    }

    /// List a directory and lazily index it one level deep / 列出目录并懒加载索引
    pub async fn list_directory(&self, path: &Path) -> Result<Vec<DirEntry>> {
        if self.is_available() {
            let service = self.clone();
            let dir = path.to_path_buf();
            tokio::spawn(async move {
                if let Err(e) = service.start_indexing(&dir, WatchDepth::SHALLOW).await {
                    tracing::warn!("Lazy index of {:?} failed: {}", dir, e);
                }
            });
        }

        let mut reader = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            names.push(entry.file_name());
        }

        let mut entries = Vec::with_capacity(names.len());
        for chunk in names.chunks(LIST_CHUNK_SIZE) {
            let stats = join_all(chunk.iter().map(|name| {
                let full_path = path.join(name);
                async move {
                    let metadata = tokio::fs::metadata(&full_path).await;
                    (full_path, metadata)
                }
            }))
            .await;

            for (full_path, metadata) in stats {
                match metadata {
                    Ok(metadata) => entries.push(dir_entry(full_path, &metadata)),
                    Err(e) => tracing::debug!("Skipping {:?}: {}", full_path, e),
                }
            }
            tokio::task::yield_now().await;
        }

        Ok(entries)
    }

    pub async fn get_favorites(&self) -> Vec<FavoriteEntry> {
        let Ok(core) = self.core() else {
            return Vec::new();
        };
        core.favorites.list().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to get favorites: {}", e);
            Vec::new()
        })
    }

    pub async fn add_favorite(&self, path: &str, name: &str) -> Result<Vec<FavoriteEntry>> {
        let core = self.core()?;
        core.favorites.add(path, name).await?;
        core.favorites.list().await
    }

    pub async fn remove_favorite(&self, path: &str) -> Result<Vec<FavoriteEntry>> {
        let core = self.core()?;
        core.favorites.remove(path).await?;
        core.favorites.list().await
    }

    pub async fn status(&self) -> ServiceStatus {
        let (stats, watched_roots) = match self.core() {
            Ok(core) => (
                core.catalog.get_stats().await,
                core.watcher
                    .watched_roots()
                    .into_iter()
                    .map(|(root, _)| root.to_string_lossy().into_owned())
                    .collect(),
            ),
            Err(_) => (IndexStats::default(), Vec::new()),
        };

        ServiceStatus {
            available: self.is_available(),
            state: self.state(),
            status: self.inner.progress.latest(),
            stats,
            watched_roots,
        }
    }

    pub fn watched_roots(&self) -> Vec<(PathBuf, WatchDepth)> {
        match self.core() {
            Ok(core) => core.watcher.watched_roots(),
            Err(_) => Vec::new(),
        }
    }

    /// Stop watching, flush what is pending and close the pool / 关闭服务
    pub async fn shutdown(&self) {
        let Ok(core) = self.core() else {
            return;
        };
        core.watcher.stop_all().await;
        core.scheduler.flush().await;
        core.catalog.close().await;
        tracing::info!("Indexer shut down");
    }
}

/// Pending repopulation after [`IndexerService::reset`] / 重置后的重新扫描
#[must_use = "the index stays empty until the rescan runs"]
pub struct Rescan {
    service: IndexerService,
    root: PathBuf,
    epoch: u64,
    started: bool,
}

impl Rescan {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deep scan of the configured root, back to Idle when done / 执行重新扫描
    pub async fn run(mut self) -> Result<()> {
        self.started = true;
        if !self.is_current() {
            tracing::debug!("Rescan of {:?} superseded by a newer reset", self.root);
            return Ok(());
        }

        let result = self.service.start_indexing(&self.root, WatchDepth::Deep).await;
        if let Err(e) = &result {
            tracing::error!("Rescan of {:?} failed: {}", self.root, e);
        }
        if self.is_current() {
            self.service.set_state(LifecycleState::Idle);
        }
        result
    }

    /// Run on a background task / 后台执行
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    fn is_current(&self) -> bool {
        match self.service.core() {
            Ok(core) => core.scheduler.current_epoch() == self.epoch,
            Err(_) => false,
        }
    }
}

impl Drop for Rescan {
    fn drop(&mut self) {
        if !self.started && self.is_current() {
            tracing::info!("Rescan of {:?} skipped, index left empty", self.root);
            self.service.set_state(LifecycleState::Idle);
            self.service.publish(false, "Index cleared");
        }
    }
}

fn dir_entry(path: PathBuf, metadata: &std::fs::Metadata) -> DirEntry {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    DirEntry {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_string_lossy().into_owned(),
        is_directory: metadata.is_dir(),
        size: metadata.len(),
        mtime,
    }
}

/// Single consumer between the watch stream and the scheduler / 事件泵
async fn pump_events(scheduler: BatchScheduler, mut events: mpsc::Receiver<WatchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WatchEvent::Added { path, stats, epoch } | WatchEvent::Changed { path, stats, epoch } => {
                scheduler.enqueue(path, stats, epoch).await;
            }
            WatchEvent::Removed { path, epoch } => {
                if let Err(e) = scheduler.remove(&path, epoch).await {
                    tracing::warn!("Failed to remove {:?}: {}", path, e);
                }
            }
            WatchEvent::Ready { root, epoch, ack } => {
                if epoch == scheduler.current_epoch() {
                    scheduler.flush().await;
                }
                tracing::debug!("Scan of {:?} applied", root);
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!("Watch event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service_for(root: &Path, data: &Path) -> IndexerService {
        let config = IndexerConfig {
            root: root.to_string_lossy().into_owned(),
            ..IndexerConfig::default()
        };
        IndexerService::open(config, &data.join("index.db")).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_indexing_makes_files_searchable() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(files.path().join("quarterly_report.pdf"), b"pdf").unwrap();

        let service = service_for(files.path(), data.path()).await;
        service.start_indexing(files.path(), WatchDepth::Deep).await.unwrap();

        let hits = service.search("quarterly").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "quarterly_report.pdf");
        assert_eq!(service.state(), LifecycleState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bootstrap_cold_start_then_background() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(files.path().join("notes.txt"), b"n").unwrap();

        let service = service_for(files.path(), data.path()).await;
        service.bootstrap().await.unwrap();
        assert_eq!(service.progress().latest(), IndexingStatus::ready());
        assert_eq!(service.search("notes").await.len(), 1);
        service.shutdown().await;

        let service = service_for(files.path(), data.path()).await;
        service.bootstrap().await.unwrap();
        assert!(service.progress().is_background());
        assert_eq!(service.search("notes").await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_list_directory_reports_entries() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir(files.path().join("photos")).unwrap();
        std::fs::write(files.path().join("todo.md"), b"- one").unwrap();

        let service = service_for(files.path(), data.path()).await;
        let mut entries = service.list_directory(files.path()).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "photos");
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].name, "todo.md");
        assert_eq!(entries[1].size, 5);

        assert!(service.list_directory(&files.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_favorites_round_through_service() {
        let files = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let service = service_for(files.path(), data.path()).await;

        let list = service.add_favorite("/home/ada/Desktop", "Desktop").await.unwrap();
        assert_eq!(list.len(), 1);
        let list = service.remove_favorite("/home/ada/Desktop").await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_unopenable_store_degrades() {
        let data = tempfile::tempdir().unwrap();
        // A directory where the database file should be
        let blocked = data.path().join("index.db");
        std::fs::create_dir(&blocked).unwrap();

        let service = IndexerService::open(IndexerConfig::default(), &blocked).await;
        assert!(!service.is_available());
        assert!(service.search("anything").await.is_empty());
        assert!(service.get_favorites().await.is_empty());
        assert!(matches!(
            service.start_indexing(data.path(), WatchDepth::Deep).await,
            Err(IndexerError::Unavailable)
        ));
        assert!(service.bootstrap().await.is_err());

        let status = service.status().await;
        assert!(!status.available);
        assert_eq!(status.status.message, "Error initializing");
        assert!(!status.status.is_indexing);
    }
}
