// 统一错误类型定义
//
// 整个上传管线共用一套错误分类：
// - 可重试错误（网络、限流、等待超时）由调度器统一按退避策略重试
// - 不可重试错误（输入、校验、远端拒绝）立即进入终态
// - 缓存持久化损坏不属于任务错误，只降级为日志警告

use thiserror::Error;

/// 上传管线错误
///
/// 错误需要 Clone：同一内容的跟随任务会复制代表任务的失败结果
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// 输入错误（文件不存在、读取失败等，不可重试）
    #[error("输入错误: {0}")]
    Input(String),

    /// 校验失败（大小、类型策略，不可重试）
    #[error("校验失败: {0}")]
    Validation(String),

    /// 网络错误（连接重置、5xx、单次请求超时，可重试）
    #[error("网络错误: {0}")]
    Network(String),

    /// 限流（429，可重试，需要更长等待时间）
    #[error("请求被限流: {0}")]
    RateLimited(String),

    /// 远端拒绝（认证失败、权限不足、参数错误等 4xx，不可重试）
    #[error("远端拒绝: {0}")]
    RemoteRejected(String),

    /// 等待超时（外链导入超过最大等待窗口，可重试）
    #[error("等待超时: {0}")]
    Timeout(String),

    /// 任务已取消
    #[error("任务已取消")]
    Cancelled,
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// 输入错误（不可重试）
    Input,
    /// 校验失败（不可重试）
    Validation,
    /// 网络错误（可重试）
    Network,
    /// 限流（可重试，需要更长等待时间）
    RateLimited,
    /// 远端拒绝（不可重试）
    RemoteRejected,
    /// 等待超时（可重试）
    Timeout,
    /// 已取消（不可重试）
    Cancelled,
}

impl UploadErrorKind {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UploadErrorKind::Network | UploadErrorKind::RateLimited | UploadErrorKind::Timeout
        )
    }
}

impl UploadError {
    /// 获取错误分类
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::Input(_) => UploadErrorKind::Input,
            UploadError::Validation(_) => UploadErrorKind::Validation,
            UploadError::Network(_) => UploadErrorKind::Network,
            UploadError::RateLimited(_) => UploadErrorKind::RateLimited,
            UploadError::RemoteRejected(_) => UploadErrorKind::RemoteRejected,
            UploadError::Timeout(_) => UploadErrorKind::Timeout,
            UploadError::Cancelled => UploadErrorKind::Cancelled,
        }
    }

    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// 从 HTTP 状态码转换
    ///
    /// 分类规则：
    /// - 429 => 限流（可重试）
    /// - 其他 4xx => 远端拒绝（不可重试）
    /// - 5xx => 网络/服务器错误（可重试）
    pub fn from_status(status: u16, body: &str) -> Self {
        // 响应体可能很长，只保留前 200 字节用于诊断
        let detail: String = body.chars().take(200).collect();
        match status {
            429 => UploadError::RateLimited(format!("status {}: {}", status, detail)),
            400..=499 => UploadError::RemoteRejected(format!("status {}: {}", status, detail)),
            _ => UploadError::Network(format!("status {}: {}", status, detail)),
        }
    }
}

impl From<reqwest::Error> for UploadError {
    /// 传输层错误一律归类为网络错误（可重试）
    ///
    /// 单次请求超时也算网络错误；Timeout 分类只用于外链导入的总等待窗口
    fn from(err: reqwest::Error) -> Self {
        UploadError::Network(err.to_string())
    }
}
