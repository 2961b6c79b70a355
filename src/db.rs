use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// Open the index database (WAL mode) / 打开索引数据库（WAL模式）
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    connect(options).await
}

/// Open from a `sqlite:` URL (DATABASE_URL override) / 通过URL打开
pub async fn open_url(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    connect(options).await
}

async fn connect(options: SqliteConnectOptions) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run database migrations, create-if-absent on every startup / 运行数据库迁移（幂等）
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            extension TEXT,
            size INTEGER,
            mtime INTEGER,
            parent_path TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Search shadow index, rowid mirrors files.id / 搜索影子索引
    sqlx::query("CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(name, path, content)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS favorites (
            path TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Older builds kept the shadow index in sync with triggers / 旧版本使用触发器同步
    for trigger in ["files_ai", "files_ad", "files_au"] {
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {}", trigger))
            .execute(pool)
            .await?;
    }

    tracing::debug!("Index schema ready");
    Ok(())
}
