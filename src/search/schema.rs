//! Catalog record and search hit definitions / 文件目录记录与搜索结果定义

use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Size and modification time observed for a path / 文件大小与修改时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub size: u64,
    /// Milliseconds since the Unix epoch / 毫秒时间戳
    pub mtime: i64,
}

impl FileStats {
    pub fn new(size: u64, mtime: i64) -> Self {
        Self { size, mtime }
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            size: metadata.len(),
            mtime,
        }
    }
}

/// One row of the file catalog, unique by path / 文件目录记录（路径唯一）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size: i64,
    pub mtime: i64,
    pub parent_path: String,
}

impl FileRecord {
    /// Derive a record from a path and optional stats / 从路径和元数据派生记录
    ///
    /// Without stats the size is 0 and the mtime is the current time, which is what a
    /// synthetic add looks like.
    pub fn derive(path: &Path, stats: Option<FileStats>) -> Self {
        let (size, mtime) = match stats {
            Some(s) => (s.size as i64, s.mtime),
            None => (0, chrono::Utc::now().timestamp_millis()),
        };
        Self {
            path: path.to_string_lossy().into_owned(),
            name: Self::extract_name(path),
            extension: Self::extract_extension(path),
            size,
            mtime,
            parent_path: Self::extract_parent(path),
        }
    }

    /// Extract filename from path / 从路径中提取文件名
    pub fn extract_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    /// Extension without the leading dot, empty when absent / 扩展名（不含点）
    pub fn extract_extension(path: &Path) -> String {
        path.extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Extract parent directory from path / 从路径中提取父目录
    pub fn extract_parent(path: &Path) -> String {
        path.parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Search result / 搜索结果
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SearchHit {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size: i64,
    pub mtime: i64,
    pub parent_path: String,
    /// FTS5 rank, lower is more relevant / 相关度（越小越相关）
    pub rank: f64,
}

/// Index statistics / 索引统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: u64,
    pub total_size: u64,
    pub last_updated: Option<i64>,
}

/// Result of applying one batch / 批次写入结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows inserted or updated / 写入的行数
    pub written: usize,
    /// Rows skipped because size and mtime were unchanged / 未变化而跳过
    pub unchanged: usize,
    /// Items that failed individually / 单项失败
    pub failed: usize,
}
