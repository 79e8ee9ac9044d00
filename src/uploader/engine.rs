// 流式上传引擎
//
// 两种传输模式，由定位符类型决定，不提供调用方选项：
// - 本地路径 => 直传：创建会话后按固定分片逐片发送，峰值内存与文件大小无关
// - URL => 外链导入：让远端自行抓取，本地只轮询状态直到终态或等待窗口耗尽
//
// 轮询绝不忙等：每轮先睡一个带随机抖动的间隔再查状态

use crate::config::ImportConfig;
use crate::error::UploadError;
use crate::reference::Locator;
use crate::remote::{ImportStatus, RemoteApi};
use crate::uploader::chunk::{plan_chunks, read_chunk};
use crate::uploader::job::UploadResult;
use crate::validate::ValidatedFile;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 上传过程中的阶段回调
///
/// 引擎通过它向上层汇报进度，不直接耦合事件总线
#[derive(Debug, Clone, Copy)]
pub enum UploadPhase {
    /// 一个分片已发送
    ChunkSent {
        /// 累计已发送字节数
        bytes_sent: u64,
        /// 总字节数
        total_bytes: u64,
    },
    /// 已提交外链导入，进入轮询等待
    AwaitingImport,
}

/// 阶段回调函数类型
pub type PhaseFn<'a> = &'a (dyn Fn(UploadPhase) + Send + Sync);

/// 流式上传引擎
pub struct StreamingUploader {
    /// 远端客户端
    client: Arc<dyn RemoteApi>,
    /// 分片大小（字节）
    chunk_size: u64,
    /// 外链导入配置
    import: ImportConfig,
}

impl StreamingUploader {
    pub fn new(client: Arc<dyn RemoteApi>, chunk_size: u64, import: ImportConfig) -> Self {
        Self {
            client,
            chunk_size,
            import,
        }
    }

    /// 执行一次上传
    ///
    /// 取消是协作式的：直传在分片边界停下，导入在轮询边界停下
    pub async fn upload(
        &self,
        locator: &Locator,
        file: &ValidatedFile,
        cancel: &CancellationToken,
        phase: PhaseFn<'_>,
    ) -> Result<UploadResult, UploadError> {
        match locator {
            Locator::LocalPath(path) => self.upload_direct(path, file, cancel, phase).await,
            Locator::Url(url) => self.upload_indirect(url, file, cancel, phase).await,
        }
    }

    /// 直传：创建会话 -> 分片发送 -> 完成会话
    async fn upload_direct(
        &self,
        path: &Path,
        file: &ValidatedFile,
        cancel: &CancellationToken,
        phase: PhaseFn<'_>,
    ) -> Result<UploadResult, UploadError> {
        let total = file.size_bytes;
        let session = self
            .client
            .create_upload_session(&file.upload_name, &file.content_type, total)
            .await?;

        debug!(
            "上传会话已创建: {} ({} bytes, session={})",
            file.upload_name, total, session.id
        );

        let chunks = plan_chunks(total, self.chunk_size);
        let mut sent: u64 = 0;
        for (index, range) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("上传已取消: {}", file.upload_name);
                return Err(UploadError::Cancelled);
            }

            let data = read_chunk(path, range).await?;
            self.client.send_chunk(&session, index, data).await?;

            sent += range.end - range.start;
            phase(UploadPhase::ChunkSent {
                bytes_sent: sent,
                total_bytes: total,
            });
        }

        let remote_id = self.client.complete_session(&session).await?;
        info!("直传完成: {} -> {}", file.upload_name, remote_id);

        Ok(UploadResult {
            remote_id,
            original_name: file.original_name.clone(),
            content_type: file.content_type.clone(),
            size: total,
            cached: false,
        })
    }

    /// 外链导入：创建导入任务 -> 轮询直到终态或窗口耗尽
    async fn upload_indirect(
        &self,
        url: &str,
        file: &ValidatedFile,
        cancel: &CancellationToken,
        phase: PhaseFn<'_>,
    ) -> Result<UploadResult, UploadError> {
        let ticket = self
            .client
            .create_external_import(url, &file.upload_name)
            .await?;

        info!("外链导入已创建: {} (ticket={})", url, ticket.id);
        phase(UploadPhase::AwaitingImport);

        let deadline = Instant::now() + self.import.max_wait();
        loop {
            if Instant::now() >= deadline {
                warn!("外链导入等待超时: {}", url);
                return Err(UploadError::Timeout(format!(
                    "外链导入超过 {:?} 未完成",
                    self.import.max_wait()
                )));
            }

            // 先睡后查；随机抖动错开多任务的轮询时刻
            let jitter = if self.import.poll_jitter_ms > 0 {
                rand::thread_rng().gen_range(0..=self.import.poll_jitter_ms)
            } else {
                0
            };
            let interval = self.import.poll_interval() + Duration::from_millis(jitter);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("外链导入已取消: {}", url);
                    return Err(UploadError::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let poll = self.client.poll_import(&ticket.id).await?;
            match poll.status {
                ImportStatus::Pending => continue,
                ImportStatus::Uploaded => {
                    info!("外链导入完成: {} -> {}", url, ticket.id);
                    return Ok(UploadResult {
                        remote_id: ticket.id,
                        original_name: file.original_name.clone(),
                        content_type: poll
                            .content_type
                            .unwrap_or_else(|| file.content_type.clone()),
                        size: poll.content_length.unwrap_or(0),
                        cached: false,
                    });
                }
                // 远端宣告的终态失败不可重试
                ImportStatus::Failed => {
                    return Err(UploadError::RemoteRejected(format!(
                        "外链导入失败: {}",
                        url
                    )));
                }
                ImportStatus::Expired => {
                    return Err(UploadError::RemoteRejected(format!(
                        "外链导入任务已过期: {}",
                        url
                    )));
                }
            }
        }
    }
}
