// 远端 API 抽象

use crate::error::UploadError;
use crate::remote::types::{ImportPoll, ImportTicket, UploadSession};
use async_trait::async_trait;

/// 远端上传 API
///
/// 管线只依赖这五个原语；具体远端服务的认证、路径、重定向
/// 都封装在实现内部。所有方法都要求实现方设置有界的单次请求超时。
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// 创建上传会话
    async fn create_upload_session(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> Result<UploadSession, UploadError>;

    /// 发送一个分片
    async fn send_chunk(
        &self,
        session: &UploadSession,
        index: usize,
        data: Vec<u8>,
    ) -> Result<(), UploadError>;

    /// 完成上传会话，返回远端文件 ID
    async fn complete_session(&self, session: &UploadSession) -> Result<String, UploadError>;

    /// 创建外链导入任务（远端自行抓取 URL）
    async fn create_external_import(
        &self,
        url: &str,
        filename: &str,
    ) -> Result<ImportTicket, UploadError>;

    /// 轮询导入任务状态
    async fn poll_import(&self, ticket_id: &str) -> Result<ImportPoll, UploadError>;
}
