//! Batch scheduler / 批量写入调度
//!
//! Coalesces watch events into batches and applies them to the catalog:
//! - a batch reaching `batch_size` is flushed inline from `enqueue`
//! - otherwise one timer flushes whatever is pending `flush_delay` after the first item
//! - flushes run strictly one at a time (`flush_lock`), each detaching the live buffer first
//!
//! Every item carries the epoch it was produced under. `reset` bumps the epoch while holding
//! the catalog writer, and a flush re-checks its epoch under the same writer before committing.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::progress::ProgressChannel;
use crate::search::{BatchOutcome, CatalogStore, FileRecord, FileStats};

#[derive(Debug, Clone)]
struct PendingItem {
    path: PathBuf,
    stats: Option<FileStats>,
}

#[derive(Default)]
struct PendingState {
    items: Vec<PendingItem>,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

struct DetachedBatch {
    items: Vec<PendingItem>,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Timer,
    Direct,
}

struct SchedulerInner {
    catalog: Arc<CatalogStore>,
    progress: Arc<ProgressChannel>,
    batch_size: usize,
    flush_delay: Duration,
    epoch: AtomicU64,
    flushes: AtomicU64,
    pending: Mutex<PendingState>,
    flush_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
}

impl BatchScheduler {
    pub fn new(
        catalog: Arc<CatalogStore>,
        progress: Arc<ProgressChannel>,
        batch_size: usize,
        flush_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                catalog,
                progress,
                batch_size: batch_size.max(1),
                flush_delay,
                epoch: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                pending: Mutex::new(PendingState::default()),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Number of batches committed so far / 已提交批次数
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().items.len()
    }

    pub fn timer_armed(&self) -> bool {
        self.inner.pending.lock().timer.is_some()
    }

    /// Queue a change notification / 加入待写入队列
    pub async fn enqueue(&self, path: PathBuf, stats: Option<FileStats>, epoch: u64) {
        let full = {
            let mut pending = self.inner.pending.lock();
            if epoch != self.current_epoch() {
                tracing::trace!("Dropping {:?} from superseded epoch {}", path, epoch);
                return;
            }
            if pending.items.is_empty() {
                pending.epoch = epoch;
            }
            pending.items.push(PendingItem { path, stats });

            if pending.items.len() >= self.inner.batch_size {
                true
            } else {
                self.arm_timer(&mut pending);
                false
            }
        };

        if full {
            self.flush_with(FlushTrigger::Direct).await;
        }
    }

    /// Flush whatever is pending right now / 立即刷新
    pub async fn flush(&self) -> Option<BatchOutcome> {
        self.flush_with(FlushTrigger::Direct).await
    }

    /// Remove a path (and its subtree) from the queue and the catalog / 删除路径
    pub async fn remove(&self, path: &Path, epoch: u64) -> Result<u64> {
        let _flush = self.inner.flush_lock.lock().await;

        {
            let mut pending = self.inner.pending.lock();
            pending.items.retain(|item| !item.path.starts_with(path));
        }

        let writer = self.inner.catalog.writer().await;
        if epoch != self.current_epoch() {
            return Ok(0);
        }
        let removed = writer.remove(&path.to_string_lossy()).await?;
        if removed > 0 {
            tracing::debug!("Removed {} record(s) under {:?}", removed, path);
        }
        Ok(removed)
    }

    /// Supersede the current epoch and drop everything pending / 重置调度器
    ///
    /// Waits for an in-flight flush. Returns the new epoch.
    pub async fn reset(&self) -> u64 {
        let _flush = self.inner.flush_lock.lock().await;
        let _writer = self.inner.catalog.writer().await;

        let mut pending = self.inner.pending.lock();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let discarded = pending.items.len();
        pending.items.clear();
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }

        tracing::debug!("Scheduler reset to epoch {}, discarded {} pending item(s)", epoch, discarded);
        epoch
    }

    fn arm_timer(&self, pending: &mut PendingState) {
        if pending.timer.is_some() {
            return;
        }
        let scheduler = self.clone();
        let delay = self.inner.flush_delay;
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.flush_with(FlushTrigger::Timer).await;
        }));
    }

    async fn flush_with(&self, trigger: FlushTrigger) -> Option<BatchOutcome> {
        let _flush = self.inner.flush_lock.lock().await;

        let batch = {
            let mut pending = self.inner.pending.lock();
            if let Some(timer) = pending.timer.take() {
                // Safe to abort under flush_lock: the timer is still sleeping or queued on the lock
                if trigger != FlushTrigger::Timer {
                    timer.abort();
                }
            }
            if pending.items.is_empty() {
                return None;
            }
            DetachedBatch {
                items: std::mem::take(&mut pending.items),
                epoch: pending.epoch,
            }
        };

        self.apply(batch).await
    }

    async fn apply(&self, batch: DetachedBatch) -> Option<BatchOutcome> {
        let records: Vec<FileRecord> = batch
            .items
            .iter()
            .map(|item| FileRecord::derive(&item.path, item.stats))
            .collect();

        let writer = self.inner.catalog.writer().await;
        if batch.epoch != self.current_epoch() {
            tracing::debug!(
                "Discarding batch of {} from superseded epoch {}",
                records.len(),
                batch.epoch
            );
            return None;
        }

        let result = writer.upsert_batch(&records).await;
        drop(writer);

        match result {
            Ok(outcome) => {
                self.inner.flushes.fetch_add(1, Ordering::SeqCst);
                let total = self.inner.progress.record_flush(records.len());
                tracing::debug!(
                    "Flushed batch of {} ({} written, {} unchanged, {} failed), total {}",
                    records.len(),
                    outcome.written,
                    outcome.unchanged,
                    outcome.failed,
                    total
                );
                Some(outcome)
            }
            Err(e) => {
                tracing::error!("Failed to batch index {} files: {}", records.len(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup(
        batch_size: usize,
        delay_ms: u64,
    ) -> (tempfile::TempDir, Arc<CatalogStore>, Arc<ProgressChannel>, BatchScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::open_pool(&dir.path().join("index.db")).await.unwrap();
        let catalog = Arc::new(CatalogStore::new(pool));
        let progress = Arc::new(ProgressChannel::new());
        let scheduler = BatchScheduler::new(
            catalog.clone(),
            progress.clone(),
            batch_size,
            Duration::from_millis(delay_ms),
        );
        (dir, catalog, progress, scheduler)
    }

    fn stats(size: u64) -> Option<FileStats> {
        Some(FileStats::new(size, 1_700_000_000_000))
    }

    #[tokio::test]
    async fn test_full_batch_flushes_inline() {
        let (_dir, catalog, _progress, scheduler) = setup(500, 200).await;

        for i in 0..500 {
            scheduler
                .enqueue(PathBuf::from(format!("/bulk/file{}.txt", i)), stats(i), 0)
                .await;
        }

        assert_eq!(scheduler.flush_count(), 1);
        assert_eq!(scheduler.pending_len(), 0);
        assert!(!scheduler.timer_armed());
        assert_eq!(catalog.count().await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_single_item_flushes_after_delay() {
        let (_dir, catalog, progress, scheduler) = setup(500, 200).await;

        scheduler.enqueue(PathBuf::from("/one/item.txt"), stats(1), 0).await;
        assert_eq!(scheduler.flush_count(), 0);
        assert!(scheduler.timer_armed());

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(scheduler.flush_count(), 1);
        assert_eq!(scheduler.pending_len(), 0);
        assert!(!scheduler.timer_armed());
        assert_eq!(catalog.count().await.unwrap(), 1);
        assert_eq!(progress.total(), 1);
    }

    #[tokio::test]
    async fn test_second_item_shares_the_armed_timer() {
        let (_dir, catalog, _progress, scheduler) = setup(500, 200).await;

        scheduler.enqueue(PathBuf::from("/one/item.txt"), stats(1), 0).await;
        scheduler.enqueue(PathBuf::from("/one/other.txt"), stats(1), 0).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(scheduler.flush_count(), 1);
        assert_eq!(catalog.count().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reset_waits_for_in_flight_flush() {
        let (_dir, catalog, _progress, scheduler) = setup(500, 10_000).await;
        scheduler.enqueue(PathBuf::from("/race/a.txt"), stats(1), 0).await;

        let writer = catalog.writer().await;
        let flushing = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.flush().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Detached and parked on the writer
        assert_eq!(scheduler.pending_len(), 0);

        let resetting = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.reset().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!resetting.is_finished());
        drop(writer);

        assert!(flushing.await.unwrap().is_some());
        assert_eq!(resetting.await.unwrap(), 1);

        // Everything from epoch 0 is committed by now, so a clear is final
        catalog.clear_all().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!catalog.has_any().await.unwrap());
        assert_eq!(scheduler.flush_count(), 1);
        assert!(!scheduler.timer_armed());
    }

    #[tokio::test]
    async fn test_missing_stats_fall_back_to_now() {
        let (_dir, catalog, _progress, scheduler) = setup(500, 200).await;
        scheduler.enqueue(PathBuf::from("/syn/added.txt"), None, 0).await;
        scheduler.flush().await.unwrap();

        let record = catalog.get("/syn/added.txt").await.unwrap().unwrap();
        assert_eq!(record.size, 0);
        assert!(record.mtime > 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_reset_discards_pending_and_stale_events() {
        let (_dir, catalog, _progress, scheduler) = setup(500, 50).await;
        scheduler.enqueue(PathBuf::from("/old/a.txt"), stats(1), 0).await;

        let epoch = scheduler.reset().await;
        assert_eq!(epoch, 1);
        assert_eq!(scheduler.pending_len(), 0);
        assert!(!scheduler.timer_armed());

        scheduler.enqueue(PathBuf::from("/old/b.txt"), stats(1), 0).await;
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(scheduler.remove(Path::new("/old"), 0).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(scheduler.flush_count(), 0);
        assert!(!catalog.has_any().await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_purges_pending_subtree() {
        let (_dir, catalog, _progress, scheduler) = setup(500, 200).await;
        scheduler.enqueue(PathBuf::from("/r/keep.txt"), stats(1), 0).await;
        scheduler.flush().await.unwrap();

        scheduler.enqueue(PathBuf::from("/r/dir/a.txt"), stats(1), 0).await;
        scheduler.enqueue(PathBuf::from("/r/dir2/b.txt"), stats(1), 0).await;
        scheduler.remove(Path::new("/r/dir"), 0).await.unwrap();
        assert_eq!(scheduler.pending_len(), 1);

        scheduler.remove(Path::new("/r/keep.txt"), 0).await.unwrap();
        scheduler.flush().await;
        assert!(catalog.get("/r/keep.txt").await.unwrap().is_none());
        assert!(catalog.get("/r/dir/a.txt").await.unwrap().is_none());
        assert!(catalog.get("/r/dir2/b.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_counter_advances_by_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::open_pool(&dir.path().join("index.db")).await.unwrap();
        let progress = Arc::new(ProgressChannel::new());
        let scheduler = BatchScheduler::new(
            Arc::new(CatalogStore::new(pool)),
            progress.clone(),
            3,
            Duration::from_millis(200),
        );

        for i in 0..3 {
            scheduler.enqueue(PathBuf::from(format!("/c/{}", i)), stats(1), 0).await;
        }
        // Re-delivering unchanged files still counts as indexed
        for i in 0..3 {
            scheduler.enqueue(PathBuf::from(format!("/c/{}", i)), stats(1), 0).await;
        }
        assert_eq!(progress.total(), 6);
        assert_eq!(progress.latest().message, "Indexed 6 files...");
    }
}
