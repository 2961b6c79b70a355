//! File catalog + search shadow index / 文件目录与搜索影子索引
//!
//! Storage layout / 存储方案：
//! - files: one row per path (unique), the authoritative catalog
//! - files_fts: FTS5 table, rowid = files.id, derived from the catalog row
//!
//! Every write that touches `files` rewrites or drops the matching `files_fts` row inside the
//! same transaction. Writes are serialized through a single writer gate.

use serde::{Deserialize, Serialize};
use sqlx::{Acquire, Row, Sqlite, SqlitePool, Transaction};
use std::path::MAIN_SEPARATOR;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use super::schema::{BatchOutcome, FileRecord, IndexStats};
use crate::error::{IndexerError, Result};

const UPSERT_SQL: &str = r#"
    INSERT INTO files (path, name, extension, size, mtime, parent_path)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(path) DO UPDATE SET
        name = excluded.name,
        extension = excluded.extension,
        size = excluded.size,
        mtime = excluded.mtime,
        parent_path = excluded.parent_path
    WHERE files.mtime != excluded.mtime OR files.size != excluded.size
    RETURNING id
"#;

/// Row of the shadow index / 影子索引行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SearchEntry {
    pub rowid: i64,
    pub name: String,
    pub path: String,
    pub content: String,
}

/// Catalog store / 文件目录存储
pub struct CatalogStore {
    db: SqlitePool,
    write_gate: Mutex<()>,
}

/// Exclusive write access to the catalog / 独占写入句柄
///
/// Holding a writer blocks every other catalog mutation until it is dropped.
pub struct CatalogWriter<'a> {
    store: &'a CatalogStore,
    _guard: MutexGuard<'a, ()>,
}

impl CatalogStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            write_gate: Mutex::new(()),
        }
    }

    /// Close database connection pool / 关闭数据库连接池
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Acquire the single writer / 获取唯一写入者
    pub async fn writer(&self) -> CatalogWriter<'_> {
        CatalogWriter {
            store: self,
            _guard: self.write_gate.lock().await,
        }
    }

    /// Atomic batch upsert / 批量写入（原子）
    pub async fn upsert_batch(&self, records: &[FileRecord]) -> Result<BatchOutcome> {
        self.writer().await.upsert_batch(records).await
    }

    /// Remove a path and everything beneath it / 删除路径及其子项
    pub async fn remove(&self, path: &str) -> Result<u64> {
        self.writer().await.remove(path).await
    }

    /// Empty the catalog and the shadow index / 清空目录与影子索引
    pub async fn clear_all(&self) -> Result<()> {
        self.writer().await.clear_all().await
    }

    /// Cheap existence probe / 是否已有索引数据
    pub async fn has_any(&self) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM files LIMIT 1")
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.db)
            .await?;
        Ok(count as u64)
    }

    /// Look up one catalog record / 查询单条记录
    pub async fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT path, name, extension, size, mtime, parent_path FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| FileRecord {
            path: r.get("path"),
            name: r.get("name"),
            extension: r.get::<Option<String>, _>("extension").unwrap_or_default(),
            size: r.get::<Option<i64>, _>("size").unwrap_or(0),
            mtime: r.get::<Option<i64>, _>("mtime").unwrap_or(0),
            parent_path: r.get::<Option<String>, _>("parent_path").unwrap_or_default(),
        }))
    }

    /// Shadow index row for a catalog path / 查询影子索引行
    pub async fn search_entry(&self, path: &str) -> Result<Option<SearchEntry>> {
        let entry = sqlx::query_as::<_, SearchEntry>(
            "SELECT rowid, name, path, content FROM files_fts WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.db)
        .await?;
        Ok(entry)
    }

    /// Number of rows in the shadow index / 影子索引行数
    pub async fn search_entry_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files_fts")
            .fetch_one(&self.db)
            .await?;
        Ok(count as u64)
    }

    /// Get index last updated time / 获取索引更新时间
    pub async fn get_last_updated(&self) -> Option<i64> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT value FROM index_meta WHERE key = 'last_updated'")
                .fetch_optional(&self.db)
                .await
                .ok()
                .flatten();

        result.and_then(|(v,)| v.parse::<i64>().ok())
    }

    /// 获取统计信息
    pub async fn get_stats(&self) -> IndexStats {
        let row = sqlx::query("SELECT COUNT(*) as total, COALESCE(SUM(size), 0) as bytes FROM files")
            .fetch_one(&self.db)
            .await;

        let last_updated = self.get_last_updated().await;

        match row {
            Ok(r) => {
                let total: i64 = r.get("total");
                let bytes: i64 = r.try_get("bytes").unwrap_or(0);
                IndexStats {
                    file_count: total as u64,
                    total_size: bytes as u64,
                    last_updated,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read index stats: {}", e);
                IndexStats::default()
            }
        }
    }
}

impl CatalogWriter<'_> {
    /// Batch upsert with retry on lock contention / 批量写入（带重试机制）
    pub async fn upsert_batch(&self, records: &[FileRecord]) -> Result<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let max_retries = 3;
        let mut last_error = None;

        for attempt in 0..max_retries {
            match self.do_upsert_batch(records).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_busy() => {
                    let delay = 100 * (attempt + 1) as u64;
                    tracing::debug!(
                        "Database locked, retrying in {}ms (attempt {}/{})",
                        delay,
                        attempt + 1,
                        max_retries
                    );
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            IndexerError::Internal(format!("Batch upsert failed after {} retries", max_retries))
        }))
    }

    async fn do_upsert_batch(&self, records: &[FileRecord]) -> Result<BatchOutcome> {
        let mut tx = self.store.db.begin().await?;
        let mut outcome = BatchOutcome::default();

        for record in records {
            match upsert_one(&mut tx, record).await {
                Ok(true) => outcome.written += 1,
                Ok(false) => outcome.unchanged += 1,
                // Lock contention is a batch-level fault, let the retry loop handle it
                Err(e) if e.is_busy() => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", record.path, e);
                    outcome.failed += 1;
                }
            }
        }

        if outcome.written > 0 {
            touch_last_updated(&mut tx).await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Delete a record (and its subtree) with its search entries / 删除记录及其搜索条目
    pub async fn remove(&self, path: &str) -> Result<u64> {
        let trimmed = path.trim_end_matches(MAIN_SEPARATOR);
        let lower = format!("{}{}", trimmed, MAIN_SEPARATOR);
        // First character after the separator, bounds every descendant path
        let upper = format!("{}{}", trimmed, (MAIN_SEPARATOR as u8 + 1) as char);

        let mut tx = self.store.db.begin().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM files WHERE path = ? OR (path >= ? AND path < ?) RETURNING id",
        )
        .bind(path)
        .bind(&lower)
        .bind(&upper)
        .fetch_all(&mut *tx)
        .await?;

        for id in &ids {
            sqlx::query("DELETE FROM files_fts WHERE rowid = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len() as u64)
    }

    /// 清空索引（清空表数据）
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.store.db.begin().await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM files_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta WHERE key = 'last_updated'")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Upsert one record inside its own savepoint / 在保存点内写入单条记录
///
/// Returns whether the row was written (false when suppressed as unchanged).
async fn upsert_one(tx: &mut Transaction<'_, Sqlite>, record: &FileRecord) -> Result<bool> {
    let mut item = (&mut *tx).begin().await?;

    match write_record(&mut item, record).await {
        Ok(written) => {
            item.commit().await?;
            Ok(written)
        }
        Err(e) => {
            if let Err(rollback) = item.rollback().await {
                tracing::debug!("Savepoint rollback failed for {}: {}", record.path, rollback);
            }
            Err(e)
        }
    }
}

async fn write_record(tx: &mut Transaction<'_, Sqlite>, record: &FileRecord) -> Result<bool> {
    let id: Option<i64> = sqlx::query_scalar(UPSERT_SQL)
        .bind(&record.path)
        .bind(&record.name)
        .bind(&record.extension)
        .bind(record.size)
        .bind(record.mtime)
        .bind(&record.parent_path)
        .fetch_optional(&mut **tx)
        .await?;

    let Some(id) = id else {
        return Ok(false);
    };

    // Re-derive the search entry from the committed row / 重新派生搜索条目
    sqlx::query("DELETE FROM files_fts WHERE rowid = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("INSERT INTO files_fts (rowid, name, path, content) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(&record.name)
        .bind(&record.path)
        .bind(&record.name)
        .execute(&mut **tx)
        .await?;

    Ok(true)
}

async fn touch_last_updated(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('last_updated', ?)")
        .bind(now.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}
