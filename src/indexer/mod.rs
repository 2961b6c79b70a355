//! Indexer - watching, batching and the service facade / 索引器
//!
//! Call direction: watcher → scheduler → search::catalog. The service wires them together and
//! owns the reset/rebuild lifecycle.

pub mod ignore;
pub mod scheduler;
pub mod service;
pub mod watcher;

pub use ignore::IgnorePolicy;
pub use scheduler::BatchScheduler;
pub use service::{IndexerService, Rescan, ServiceStatus};
pub use watcher::{WatchEvent, WatchManager};
