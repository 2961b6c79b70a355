//! Progress channel / 进度通道
//!
//! Latest status is kept in a `watch` so late subscribers and status polls always see the
//! final value; every status is also fanned out on a `broadcast` for live streams (SSE).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};

use crate::models::IndexingStatus;

const EVENT_CAPACITY: usize = 256;

pub struct ProgressChannel {
    total: AtomicU64,
    background: AtomicBool,
    latest: watch::Sender<IndexingStatus>,
    events: broadcast::Sender<IndexingStatus>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(IndexingStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            total: AtomicU64::new(0),
            background: AtomicBool::new(false),
            latest,
            events,
        }
    }

    /// Publish a status to every subscriber / 发布状态
    pub fn publish(&self, status: IndexingStatus) {
        self.latest.send_replace(status.clone());
        // No receivers is fine, the watch keeps the value
        let _ = self.events.send(status);
    }

    pub fn publish_message(&self, is_indexing: bool, message: &str) {
        self.publish(IndexingStatus::new(is_indexing, message));
    }

    /// Advance the total-indexed counter after a flush / 批次写入后累加计数
    pub fn record_flush(&self, items: usize) -> u64 {
        let count = self.total.fetch_add(items as u64, Ordering::SeqCst) + items as u64;
        let is_indexing = !self.background.load(Ordering::SeqCst);
        self.publish(
            IndexingStatus::new(is_indexing, format!("Indexed {} files...", format_count(count)))
                .with_count(count),
        );
        count
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.total.store(0, Ordering::SeqCst);
    }

    /// Background scans report progress without marking the UI busy / 后台扫描标记
    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::SeqCst);
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    pub fn latest(&self) -> IndexingStatus {
        self.latest.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<IndexingStatus> {
        self.latest.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexingStatus> {
        self.events.subscribe()
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a count with thousands separators / 千位分隔格式化
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
