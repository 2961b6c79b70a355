use serde::{Deserialize, Serialize};

/// Status pushed to the GUI / 推送给界面的索引状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingStatus {
    pub is_indexing: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl IndexingStatus {
    pub fn new(is_indexing: bool, message: impl Into<String>) -> Self {
        Self {
            is_indexing,
            message: message.into(),
            count: None,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn ready() -> Self {
        Self::new(false, "Ready")
    }
}

impl Default for IndexingStatus {
    fn default() -> Self {
        Self::new(false, "Idle")
    }
}

/// Reset/rebuild lifecycle / 重建状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Resetting,
    Scanning,
}

/// Recursion limit for a watched root / 监听递归深度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchDepth {
    /// Levels below the root, 0 = direct children only / 根目录下的层数
    Limited(u32),
    /// No limit, used for full home scans / 不限深度
    Deep,
}

impl WatchDepth {
    pub const SHALLOW: WatchDepth = WatchDepth::Limited(0);

    /// Directory nesting allowed below the root / 允许的目录层级
    pub fn allows(&self, levels_below_root: usize) -> bool {
        match self {
            WatchDepth::Limited(max) => levels_below_root <= *max as usize,
            WatchDepth::Deep => true,
        }
    }

    /// Depth limit for walkdir (root = 0, its children = 1) / walkdir 深度
    pub fn walk_max_depth(&self) -> usize {
        match self {
            WatchDepth::Limited(max) => *max as usize + 1,
            WatchDepth::Deep => usize::MAX,
        }
    }
}

impl From<Option<u32>> for WatchDepth {
    fn from(depth: Option<u32>) -> Self {
        match depth {
            Some(d) => WatchDepth::Limited(d),
            None => WatchDepth::Deep,
        }
    }
}

/// Favorite folder / 收藏夹条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FavoriteEntry {
    pub path: String,
    pub name: String,
}

/// Browsable top-level location (drive or filesystem root) / 根目录条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    pub name: String,
    pub path: String,
}

/// Directory listing entry / 目录列表条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub mtime: i64,
}
