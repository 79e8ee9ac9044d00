// 远端 API 数据类型定义

use serde::{Deserialize, Serialize};

/// 上传会话
///
/// create_upload_session 返回，后续分片发送和完成调用都要携带
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// 会话 ID
    pub id: String,
    /// 分片发送地址
    pub upload_url: String,
}

/// 外链导入凭据
///
/// create_external_import 返回
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportTicket {
    /// 导入任务 ID
    pub id: String,
    /// 创建时刻的状态
    pub status: ImportStatus,
}

/// 外链导入状态
///
/// 对应远端状态接口返回的 status 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// 等待中（远端还在抓取）
    Pending,
    /// 导入完成
    Uploaded,
    /// 导入失败
    Failed,
    /// 任务过期
    Expired,
}

impl ImportStatus {
    /// 从远端返回的字符串转换
    ///
    /// 未知状态按等待中处理（继续轮询，由等待窗口兜底）
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "uploaded" => Self::Uploaded,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// 是否成功
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Uploaded)
    }
}

impl Default for ImportStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// 导入状态轮询结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPoll {
    /// 当前状态
    pub status: ImportStatus,
    /// 文件大小（导入完成后远端回报）
    #[serde(default)]
    pub content_length: Option<u64>,
    /// 内容类型（导入完成后远端回报）
    #[serde(default)]
    pub content_type: Option<String>,
}
