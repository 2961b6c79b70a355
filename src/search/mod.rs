//! Search module - catalog storage and query primitives / 搜索模块
//!
//! Architecture principles / 架构原则：
//! - Search module only exposes primitive operations: upsert_batch, remove, clear_all, search
//! - The indexer controls scanning, batching, progress and error recovery
//! - Call direction: Indexer → Search (unidirectional) / 调用方向
//!
//! Index features / 索引特性：
//! - SQLite catalog keyed by path, FTS5 shadow index written in the same transaction
//! - Change suppression: unchanged size + mtime never rewrites a row
//! - Prefix + phrase matching, FTS5 rank ordering

pub mod catalog;
pub mod query;
pub mod schema;

pub use catalog::{CatalogStore, CatalogWriter, SearchEntry};
pub use query::{compile_match_expression, QueryEngine};
pub use schema::{BatchOutcome, FileRecord, FileStats, IndexStats, SearchHit};
