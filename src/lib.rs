pub mod config;
pub mod db;
pub mod error;
pub mod favorites;
pub mod indexer;
pub mod models;
pub mod progress;
pub mod search;

pub use error::{IndexerError, Result};
pub use indexer::IndexerService;
