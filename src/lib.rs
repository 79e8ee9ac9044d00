// Doc Uplink Rust Library
// 文档附件上传管线核心库
//
// 把文档解析层发现的文件/URL 引用批量转换为持久的远端对象：
// 内容寻址去重、TTL 缓存、有界并发、统一重试、部分失败隔离

// 配置管理模块
pub mod config;

// 统一错误类型
pub mod error;

// 文件引用模型
pub mod reference;

// 远端 API 模块
pub mod remote;

// 上传前校验
pub mod validate;

// 内容去重
pub mod dedup;

// 缓存模块
pub mod cache;

// 进度事件模块
pub mod events;

// 上传子系统
pub mod uploader;

// 日志系统
pub mod logging;

// 导出常用类型
pub use cache::{CacheEntry, CacheStore, JsonFileStore, SqliteCacheStore, UploadCache};
pub use config::{CacheBackend, PipelineConfig};
pub use dedup::{compute_digest, ContentDigest};
pub use error::{UploadError, UploadErrorKind};
pub use events::{EventBus, PipelineEvent, ProgressThrottler};
pub use reference::{FileReference, Locator, ReferenceKind};
pub use remote::{HttpRemoteClient, ImportStatus, RemoteApi};
pub use uploader::{
    BatchReport, BatchUploadManager, JobOutcome, JobState, RetryPolicy, StreamingUploader,
    UploadJob, UploadResult,
};
pub use validate::{FileValidator, ValidatedFile};
