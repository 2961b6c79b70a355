//! Watch manager / 目录监听管理
//!
//! One observer per root. The initial walk (walkdir) and live notifications (notify) feed the
//! same event stream. Each root owns a gate: callbacks hold it shared while sending, and
//! `stop_watch` takes it exclusively, so once stop returns no further event can arrive.
//!
//! The event stream is bounded. Walkers and notify callbacks block on a full buffer, so a deep
//! scan advances at the speed the consumer commits batches.

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use walkdir::WalkDir;

use super::ignore::IgnorePolicy;
use crate::error::{IndexerError, Result};
use crate::models::WatchDepth;
use crate::search::FileStats;

/// Events buffered between the watch threads and the consumer / 事件缓冲上限
pub const EVENT_BUFFER: usize = 4096;

/// Change notification emitted by a watched root / 文件变更事件
#[derive(Debug)]
pub enum WatchEvent {
    Added {
        path: PathBuf,
        stats: Option<FileStats>,
        epoch: u64,
    },
    Changed {
        path: PathBuf,
        stats: Option<FileStats>,
        epoch: u64,
    },
    Removed {
        path: PathBuf,
        epoch: u64,
    },
    /// Initial walk finished; the consumer acks once everything before it is applied
    Ready {
        root: PathBuf,
        epoch: u64,
        ack: oneshot::Sender<()>,
    },
}

impl WatchEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            WatchEvent::Added { epoch, .. }
            | WatchEvent::Changed { epoch, .. }
            | WatchEvent::Removed { epoch, .. }
            | WatchEvent::Ready { epoch, .. } => *epoch,
        }
    }
}

struct WatchedRoot {
    depth: WatchDepth,
    epoch: u64,
    gate: Arc<RwLock<bool>>,
    watcher: Option<RecommendedWatcher>,
}

#[derive(Clone)]
struct RootScope {
    root: PathBuf,
    depth: WatchDepth,
    ignore: Arc<IgnorePolicy>,
}

impl RootScope {
    /// Inside the root, within the depth limit and not ignored
    fn admits(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        let levels = relative.components().count();
        // A file `levels` components down sits in directory nesting `levels - 1`
        levels >= 1 && self.depth.allows(levels - 1) && !self.ignore.is_ignored(&self.root, path)
    }
}

#[derive(Clone)]
struct Emitter {
    gate: Arc<RwLock<bool>>,
    events: mpsc::Sender<WatchEvent>,
    epoch: u64,
}

impl Emitter {
    /// Send unless the root has been stopped, false once closed
    ///
    /// Blocks while the buffer is full; only call from walker or notify threads.
    fn emit(&self, event: WatchEvent) -> bool {
        let open = self.gate.read();
        if !*open {
            return false;
        }
        self.events.blocking_send(event).is_ok()
    }
}

pub struct WatchManager {
    roots: Mutex<HashMap<PathBuf, WatchedRoot>>,
    events: mpsc::Sender<WatchEvent>,
    ignore: Arc<IgnorePolicy>,
}

impl WatchManager {
    pub fn new(ignore: IgnorePolicy) -> (Self, mpsc::Receiver<WatchEvent>) {
        Self::with_capacity(ignore, EVENT_BUFFER)
    }

    pub fn with_capacity(ignore: IgnorePolicy, capacity: usize) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (events, rx) = mpsc::channel(capacity.max(1));
        let manager = Self {
            roots: Mutex::new(HashMap::new()),
            events,
            ignore: Arc::new(ignore),
        };
        (manager, rx)
    }

    /// Watch `root` and resolve after its initial walk / 开始监听，初次扫描完成后返回
    ///
    /// A root that is already watched is left alone and the call returns immediately. A
    /// leftover watch registered under an older epoch is replaced.
    pub async fn start_watch(&self, root: &Path, depth: WatchDepth, epoch: u64) -> Result<()> {
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|_| IndexerError::InvalidPath(root.to_path_buf()))?;
        if !metadata.is_dir() {
            return Err(IndexerError::InvalidPath(root.to_path_buf()));
        }

        let root = root.to_path_buf();
        let gate = Arc::new(RwLock::new(true));
        let stale = {
            let mut roots = self.roots.lock();
            if let Some(existing) = roots.get(&root) {
                if existing.epoch >= epoch {
                    tracing::debug!("Watcher for {:?} already exists, skipping", root);
                    return Ok(());
                }
            }
            roots.insert(
                root.clone(),
                WatchedRoot {
                    depth,
                    epoch,
                    gate: gate.clone(),
                    watcher: None,
                },
            )
        };
        if let Some(stale) = stale {
            close(stale).await;
        }

        tracing::info!("Indexing directory {:?} (depth {:?})", root, depth);

        let scope = RootScope {
            root: root.clone(),
            depth,
            ignore: self.ignore.clone(),
        };
        let emitter = Emitter {
            gate: gate.clone(),
            events: self.events.clone(),
            epoch,
        };

        let scan = {
            let scope = scope.clone();
            let emitter = emitter.clone();
            tokio::task::spawn_blocking(move || {
                let watcher = match create_watcher(&scope, &emitter) {
                    Ok(w) => Some(w),
                    Err(e) => {
                        tracing::warn!("Live watching unavailable for {:?}: {}", scope.root, e);
                        None
                    }
                };
                let scanned = walk_tree(&scope, &emitter, &scope.root);
                (watcher, scanned)
            })
            .await
        };

        let (watcher, scanned) = match scan {
            Ok(result) => result,
            Err(e) => {
                self.forget(&root, &gate);
                return Err(IndexerError::Internal(format!("Scan of {:?} failed: {}", root, e)));
            }
        };

        {
            let mut roots = self.roots.lock();
            match roots.get_mut(&root) {
                Some(entry) if Arc::ptr_eq(&entry.gate, &gate) => entry.watcher = watcher,
                _ => {
                    tracing::debug!("Watch on {:?} stopped during the initial scan", root);
                    return Ok(());
                }
            }
        }

        let (ack, acked) = oneshot::channel();
        let ready = WatchEvent::Ready {
            root: root.clone(),
            epoch,
            ack,
        };
        let sent = tokio::task::spawn_blocking(move || emitter.emit(ready))
            .await
            .unwrap_or(false);
        if sent {
            // Err only when the consumer went away
            let _ = acked.await;
        }

        tracing::info!("Initial scan complete for {:?} ({} files)", root, scanned);
        Ok(())
    }

    /// Stop one root; no event from it arrives after this returns / 停止监听
    pub async fn stop_watch(&self, root: &Path) -> bool {
        let entry = self.roots.lock().remove(root);
        match entry {
            Some(entry) => {
                close(entry).await;
                tracing::info!("Stopped watching {:?}", root);
                true
            }
            None => false,
        }
    }

    /// Stop and discard every root / 停止全部监听
    pub async fn stop_all(&self) -> usize {
        let entries: Vec<(PathBuf, WatchedRoot)> = self.roots.lock().drain().collect();
        let count = entries.len();
        for (_, entry) in entries {
            close(entry).await;
        }
        if count > 0 {
            tracing::info!("Stopped {} watcher(s)", count);
        }
        count
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        self.roots.lock().contains_key(root)
    }

    pub fn watched_roots(&self) -> Vec<(PathBuf, WatchDepth)> {
        let mut roots: Vec<_> = self
            .roots
            .lock()
            .iter()
            .map(|(path, entry)| (path.clone(), entry.depth))
            .collect();
        roots.sort_by(|a, b| a.0.cmp(&b.0));
        roots
    }

    fn forget(&self, root: &Path, gate: &Arc<RwLock<bool>>) {
        let mut roots = self.roots.lock();
        if roots.get(root).map(|e| Arc::ptr_eq(&e.gate, gate)).unwrap_or(false) {
            roots.remove(root);
        }
    }
}

/// Close the gate (waiting out in-flight callbacks) and drop the observer
async fn close(entry: WatchedRoot) {
    let result = tokio::task::spawn_blocking(move || {
        *entry.gate.write() = false;
        drop(entry.watcher);
    })
    .await;
    if let Err(e) = result {
        tracing::warn!("Failed to close watcher: {}", e);
    }
}

fn create_watcher(scope: &RootScope, emitter: &Emitter) -> notify::Result<RecommendedWatcher> {
    let handler_scope = scope.clone();
    let handler_emitter = emitter.clone();

    let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => handle_event(&handler_scope, &handler_emitter, event),
        Err(e) => tracing::warn!("Watcher error on {:?}: {}", handler_scope.root, e),
    })?;

    let mode = match scope.depth {
        WatchDepth::Limited(0) => RecursiveMode::NonRecursive,
        _ => RecursiveMode::Recursive,
    };
    watcher.watch(&scope.root, mode)?;
    Ok(watcher)
}

/// Walk `start` (the root or a directory that appeared under it), emitting every file
fn walk_tree(scope: &RootScope, emitter: &Emitter, start: &Path) -> usize {
    let base_levels = start
        .strip_prefix(&scope.root)
        .map(|r| r.components().count())
        .unwrap_or(0);
    let max_depth = scope.depth.walk_max_depth().saturating_sub(base_levels);

    let walker = WalkDir::new(start)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| !scope.ignore.is_ignored(&scope.root, e.path()));

    let mut emitted = 0;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {:?}: {}", start, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let stats = match entry.metadata() {
            Ok(metadata) => FileStats::from_metadata(&metadata),
            Err(e) => {
                tracing::debug!("Stat failed for {:?}: {}", entry.path(), e);
                continue;
            }
        };
        let event = WatchEvent::Added {
            path: entry.into_path(),
            stats: Some(stats),
            epoch: emitter.epoch,
        };
        if !emitter.emit(event) {
            break;
        }
        emitted += 1;
    }
    emitted
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Observed {
    Added,
    Changed,
    Unknown,
}

fn handle_event(scope: &RootScope, emitter: &Emitter, event: Event) {
    match event.kind {
        EventKind::Create(_) => {
            for path in event.paths {
                observe(scope, emitter, path, Observed::Added);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            for path in event.paths {
                removed(scope, emitter, path);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in event.paths {
                observe(scope, emitter, path, Observed::Added);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            if let Some(from) = paths.next() {
                removed(scope, emitter, from);
            }
            if let Some(to) = paths.next() {
                observe(scope, emitter, to, Observed::Added);
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Any => {
            for path in event.paths {
                observe(scope, emitter, path, Observed::Unknown);
            }
        }
        EventKind::Modify(_) => {
            for path in event.paths {
                observe(scope, emitter, path, Observed::Changed);
            }
        }
        EventKind::Access(_) | EventKind::Other => {}
    }
}

fn removed(scope: &RootScope, emitter: &Emitter, path: PathBuf) {
    if scope.admits(&path) {
        emitter.emit(WatchEvent::Removed {
            path,
            epoch: emitter.epoch,
        });
    }
}

/// Stat a path from a live event and emit what it turned out to be
fn observe(scope: &RootScope, emitter: &Emitter, path: PathBuf, observed: Observed) {
    if !scope.admits(&path) {
        return;
    }

    match std::fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => {
            let stats = Some(FileStats::from_metadata(&metadata));
            let epoch = emitter.epoch;
            let event = match observed {
                Observed::Changed => WatchEvent::Changed { path, stats, epoch },
                Observed::Added | Observed::Unknown => WatchEvent::Added { path, stats, epoch },
            };
            emitter.emit(event);
        }
        Ok(metadata) if metadata.is_dir() => {
            // New or moved-in directory, its contents were never seen
            if observed != Observed::Changed {
                walk_tree(scope, emitter, &path);
            }
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => removed(scope, emitter, path),
        Err(e) => tracing::warn!("Stat failed for {:?}: {}", path, e),
    }
}
