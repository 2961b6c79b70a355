//! Application configuration module / 应用配置模块
//!
//! Manages configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    pub server: ServerConfig,
    /// Database configuration / 数据库配置
    pub database: DatabaseConfig,
    /// Indexer configuration / 索引配置
    #[serde(default)]
    pub indexer: IndexerConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Index database file (relative to data_dir) / 索引数据库文件
    pub db_file: String,
}

/// Indexer configuration / 索引配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Root scanned at startup and on rebuild, empty means home directory / 默认扫描根目录
    pub root: String,
    /// Pending batch size that forces an immediate flush / 批量大小
    pub batch_size: usize,
    /// Idle delay before a partial batch is flushed / 刷新延迟（毫秒）
    pub flush_delay_ms: u64,
    /// Result cap for a single search / 搜索结果上限
    pub max_results: usize,
    /// Additional ignore rules (regex, one per entry) / 额外忽略规则
    pub extra_ignore: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8190,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "index.db".to_string(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            batch_size: 500,
            flush_delay_ms: 200,
            max_results: 100,
            extra_ignore: Vec::new(),
        }
    }
}

impl IndexerConfig {
    /// Resolve the configured root, falling back to the home directory / 解析扫描根目录
    pub fn root_path(&self) -> PathBuf {
        if self.root.trim().is_empty() {
            home_dir()
        } else {
            PathBuf::from(&self.root)
        }
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

impl AppConfig {
    /// Get the full database URL / 获取完整的数据库URL
    pub fn get_database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.get_database_path().to_string_lossy())
    }

    /// Get the index database file path / 获取索引数据库路径
    pub fn get_database_path(&self) -> PathBuf {
        Path::new(&self.database.data_dir).join(&self.database.db_file)
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.database.data_dir)
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Current user's home directory / 当前用户主目录
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    let config_path = get_config_path();

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<AppConfig>>, String> {
    let config = load_config()?;

    let config_arc = Arc::new(RwLock::new(config));

    CONFIG
        .set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG
        .get_or_init(|| {
            let config = load_config().unwrap_or_default();
            Arc::new(RwLock::new(config))
        })
        .clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> AppConfig {
    get_config().read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_scheduler_contract() {
        let config = IndexerConfig::default();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.flush_delay(), Duration::from_millis(200));
        assert_eq!(config.max_results, 100);
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let raw = r#"{
            "server": { "host": "0.0.0.0", "port": 9000 },
            "database": { "data_dir": "/tmp/idx", "db_file": "catalog.db" },
            "indexer": { "root": "/srv/share" }
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.indexer.root_path(), PathBuf::from("/srv/share"));
        assert_eq!(config.indexer.batch_size, 500);
        assert_eq!(config.get_bind_address(), "0.0.0.0:9000");
        assert_eq!(config.get_database_url(), "sqlite:/tmp/idx/catalog.db?mode=rwc");
    }

    #[test]
    fn test_empty_root_means_home() {
        let config = IndexerConfig::default();
        assert_eq!(config.root_path(), home_dir());
    }
}
