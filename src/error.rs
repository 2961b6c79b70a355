//! Error types / 错误类型

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Index store unavailable")]
    Unavailable,

    #[error("Index rebuild already in progress")]
    Busy,

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexerError {
    /// SQLite reported a lock conflict, worth retrying / 数据库锁冲突，可重试
    pub fn is_busy(&self) -> bool {
        match self {
            IndexerError::Database(sqlx::Error::Database(db)) => {
                let message = db.message();
                message.contains("database is locked") || message.contains("SQLITE_BUSY")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;
