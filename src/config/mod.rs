// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// 管线配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 远端 API 配置
    #[serde(default)]
    pub remote: RemoteConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 外链导入配置
    #[serde(default)]
    pub import: ImportConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 远端 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API 基础地址
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// API 密钥（留空时从环境变量 UPLINK_API_KEY 读取）
    #[serde(default)]
    pub api_key: String,
    /// API 版本头
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.example.com/v1".to_string()
}

fn default_api_version() -> String {
    "2024-06-01".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    /// 解析出实际使用的 API 密钥
    ///
    /// 配置文件优先，否则回退到环境变量 UPLINK_API_KEY
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var("UPLINK_API_KEY").unwrap_or_default()
    }

    /// 单次请求超时
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 单文件大小上限（字节）
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// 流式上传分片大小（字节）
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: u64,
    /// 最大同时上传任务数
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// 最大同时哈希任务数（哈希与网络传输资源特征不同，独立设置）
    #[serde(default = "default_max_concurrent_hashing")]
    pub max_concurrent_hashing: usize,
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// 最大退避延迟（毫秒）
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// 限流时的最短等待时间（毫秒）
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    /// 允许的 URL 协议
    #[serde(default = "default_allowed_url_schemes")]
    pub allowed_url_schemes: Vec<String>,
    /// 远端原生支持的扩展名
    #[serde(default = "default_native_extensions")]
    pub native_extensions: HashSet<String>,
    /// 需要 .txt 后缀变通的文本类扩展名
    ///
    /// 远端 API 不接受这些类型的原始扩展名，上传时追加 .txt 后缀、
    /// MIME 统一用 text/plain，结果中保留原始文件名
    #[serde(default = "default_workaround_extensions")]
    pub workaround_extensions: HashSet<String>,
}

fn default_max_file_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_stream_chunk_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_max_concurrent_uploads() -> usize {
    5
}

fn default_max_concurrent_hashing() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_rate_limit_backoff_ms() -> u64 {
    10_000
}

fn default_allowed_url_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_native_extensions() -> HashSet<String> {
    [
        // 音频
        ".aac", ".adts", ".mid", ".midi", ".mp3", ".mpga", ".m4a", ".m4b", ".oga", ".ogg",
        ".wav", ".wma",
        // 文档
        ".pdf", ".txt", ".json", ".doc", ".dot", ".docx", ".dotx", ".xls", ".xlt", ".xla",
        ".xlsx", ".xltx", ".ppt", ".pot", ".pps", ".ppa", ".pptx", ".potx",
        // 图片
        ".gif", ".heic", ".jpeg", ".jpg", ".png", ".svg", ".tif", ".tiff", ".webp", ".ico",
        // 视频
        ".amv", ".asf", ".wmv", ".avi", ".f4v", ".flv", ".gifv", ".m4v", ".mp4", ".mkv",
        ".webm", ".mov", ".qt", ".mpeg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_workaround_extensions() -> HashSet<String> {
    [
        // 编程语言
        ".py", ".sh", ".bash", ".md", ".js", ".ts", ".jsx", ".tsx", ".java", ".cpp", ".c",
        ".h", ".hpp", ".cs", ".rb", ".go", ".rs", ".swift", ".kt", ".scala", ".r", ".m",
        ".mm", ".php", ".pl", ".lua", ".dart", ".elm", ".clj", ".ex", ".exs",
        // 配置/数据格式
        ".yaml", ".yml", ".toml", ".ini", ".cfg", ".conf", ".xml", ".env", ".properties",
        ".gitignore", ".editorconfig",
        // Web
        ".html", ".css", ".scss", ".sass", ".less",
        // 数据库/查询
        ".sql", ".graphql", ".proto",
        // 构建/部署
        ".dockerfile", ".makefile", ".gradle", ".cmake",
        // 文档
        ".rst", ".adoc", ".tex",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            stream_chunk_size: default_stream_chunk_size(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_concurrent_hashing: default_max_concurrent_hashing(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            allowed_url_schemes: default_allowed_url_schemes(),
            native_extensions: default_native_extensions(),
            workaround_extensions: default_workaround_extensions(),
        }
    }
}

impl UploadConfig {
    /// 扩展名是否在允许范围内（原生支持或可变通）
    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.native_extensions.contains(&ext) || self.workaround_extensions.contains(&ext)
    }

    /// 扩展名是否需要 .txt 后缀变通
    pub fn needs_extension_workaround(&self, ext: &str) -> bool {
        self.workaround_extensions.contains(&ext.to_lowercase())
    }

    /// URL 协议是否允许
    pub fn is_allowed_scheme(&self, scheme: &str) -> bool {
        self.allowed_url_schemes.iter().any(|s| s == scheme)
    }

    /// 按扩展名解析 MIME 类型
    ///
    /// 映射表来自远端 API 文档；未知扩展名回退 application/octet-stream
    pub fn mime_type_for(&self, ext: &str) -> &'static str {
        match ext.to_lowercase().as_str() {
            // 音频
            ".aac" | ".adts" => "audio/aac",
            ".mid" | ".midi" => "audio/midi",
            ".mp3" | ".mpga" => "audio/mpeg",
            ".m4a" | ".m4b" => "audio/mp4",
            ".oga" | ".ogg" => "audio/ogg",
            ".wav" => "audio/wav",
            ".wma" => "audio/x-ms-wma",
            // 文档
            ".pdf" => "application/pdf",
            ".txt" => "text/plain",
            ".json" => "application/json",
            ".doc" | ".dot" => "application/msword",
            ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ".dotx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.template",
            ".xls" | ".xlt" | ".xla" => "application/vnd.ms-excel",
            ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ".xltx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.template",
            ".ppt" | ".pot" | ".pps" | ".ppa" => "application/vnd.ms-powerpoint",
            ".pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            ".potx" => "application/vnd.openxmlformats-officedocument.presentationml.template",
            // 图片
            ".gif" => "image/gif",
            ".heic" => "image/heic",
            ".jpeg" | ".jpg" => "image/jpeg",
            ".png" => "image/png",
            ".svg" => "image/svg+xml",
            ".tif" | ".tiff" => "image/tiff",
            ".webp" => "image/webp",
            ".ico" => "image/vnd.microsoft.icon",
            // 视频
            ".amv" => "video/x-amv",
            ".asf" => "video/x-ms-asf",
            ".wmv" => "video/x-ms-wmv",
            ".avi" => "video/x-msvideo",
            ".f4v" => "video/x-f4v",
            ".flv" => "video/x-flv",
            ".gifv" | ".mp4" => "video/mp4",
            ".m4v" => "video/x-m4v",
            ".mkv" => "video/x-matroska",
            ".webm" => "video/webm",
            ".mov" | ".qt" => "video/quicktime",
            ".mpeg" => "video/mpeg",
            _ => "application/octet-stream",
        }
    }
}

/// 缓存后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// 单个 JSON 文件
    Json,
    /// SQLite 数据库
    Sqlite,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 是否启用持久化缓存
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// 持久化后端
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,
    /// 持久化文件路径
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// 条目存活时间（小时）
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,
    /// 最大条目数（清理时保留最新的条目）
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Json
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("upload_cache.json")
}

fn default_cache_ttl_hours() -> u64 {
    24
}

fn default_cache_max_entries() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            backend: default_cache_backend(),
            path: default_cache_path(),
            ttl_hours: default_cache_ttl_hours(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl CacheConfig {
    /// 条目存活时间
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }
}

/// 外链导入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// 轮询间隔（毫秒）
    #[serde(default = "default_import_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 轮询间隔随机抖动上限（毫秒）
    #[serde(default = "default_import_poll_jitter_ms")]
    pub poll_jitter_ms: u64,
    /// 最大等待窗口（秒）
    #[serde(default = "default_import_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_import_poll_interval_ms() -> u64 {
    1000
}

fn default_import_poll_jitter_ms() -> u64 {
    250
}

fn default_import_max_wait_secs() -> u64 {
    3600 // 1 小时，与远端任务过期窗口同级
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_import_poll_interval_ms(),
            poll_jitter_ms: default_import_poll_jitter_ms(),
            max_wait_secs: default_import_max_wait_secs(),
        }
    }
}

impl ImportConfig {
    /// 轮询间隔
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 最大等待窗口
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_retention_days() -> u32 {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
            retention_days: default_log_retention_days(),
        }
    }
}

impl PipelineConfig {
    /// 从 TOML 文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        let config: PipelineConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        info!("已加载配置文件: {}", path);
        Ok(config)
    }

    /// 加载配置，失败时回退到默认值
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => config,
            Err(e) => {
                warn!("加载配置失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
