// 测试用远端 API 假实现
//
// 记录调用次数、观测并发峰值，并支持按脚本注入失败，
// 供上传引擎和批量调度器的单元测试使用

use crate::error::UploadError;
use crate::remote::api::RemoteApi;
use crate::remote::types::{ImportPoll, ImportStatus, ImportTicket, UploadSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// 远端 API 假实现
#[derive(Debug, Default)]
pub struct MockRemote {
    /// 创建会话的调用总次数（含被注入失败的调用）
    pub session_attempts: AtomicUsize,
    /// 已创建的上传会话数（等于真实发起的网络上传次数）
    pub sessions_created: AtomicUsize,
    /// 已发送的分片数
    pub chunks_sent: AtomicUsize,
    /// 已发送的字节数
    pub bytes_sent: AtomicU64,
    /// 已完成的会话数
    pub completes: AtomicUsize,
    /// 已创建的导入任务数
    pub imports_created: AtomicUsize,
    /// 状态轮询次数
    pub polls: AtomicUsize,
    /// 当前并发中的上传操作数
    active: AtomicUsize,
    /// 观测到的并发峰值
    pub max_concurrent: AtomicUsize,
    /// 创建会话时注入的瞬时网络错误剩余次数
    transient_failures: AtomicU32,
    /// 创建会话时永远返回远端拒绝
    reject_sessions: AtomicU32,
    /// 导入轮询状态脚本（按序弹出；耗尽后返回 Uploaded）
    import_script: Mutex<VecDeque<ImportStatus>>,
    /// 每个分片发送的人为延迟（毫秒），用于并发观测
    pub op_delay_ms: u64,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置分片发送延迟，便于并发峰值观测
    pub fn with_op_delay_ms(mut self, delay_ms: u64) -> Self {
        self.op_delay_ms = delay_ms;
        self
    }

    /// 前 n 次创建会话返回瞬时网络错误
    pub fn fail_transient(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// 所有创建会话的调用都返回远端拒绝（认证失败）
    pub fn reject_all_sessions(&self) {
        self.reject_sessions.store(1, Ordering::SeqCst);
    }

    /// 设置导入轮询状态脚本
    pub fn script_import(&self, statuses: Vec<ImportStatus>) {
        *self.import_script.lock() = statuses.into();
    }

    /// 真实发生的网络上传次数（会话创建 + 导入创建）
    pub fn network_uploads(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst) + self.imports_created.load(Ordering::SeqCst)
    }

    /// 进入一次并发操作，更新峰值
    fn begin_op(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
    }

    fn end_op(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn create_upload_session(
        &self,
        filename: &str,
        _content_type: &str,
        _size: u64,
    ) -> Result<UploadSession, UploadError> {
        self.session_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_sessions.load(Ordering::SeqCst) != 0 {
            return Err(UploadError::RemoteRejected("invalid token".to_string()));
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(UploadError::Network("connection reset".to_string()));
        }

        let n = self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(UploadSession {
            id: format!("session-{}-{}", n, filename),
            upload_url: format!("mock://upload/{}", n),
        })
    }

    async fn send_chunk(
        &self,
        _session: &UploadSession,
        _index: usize,
        data: Vec<u8>,
    ) -> Result<(), UploadError> {
        self.begin_op();
        if self.op_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.op_delay_ms)).await;
        }
        self.chunks_sent.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(data.len() as u64, Ordering::SeqCst);
        self.end_op();
        Ok(())
    }

    async fn complete_session(&self, session: &UploadSession) -> Result<String, UploadError> {
        let n = self.completes.fetch_add(1, Ordering::SeqCst);
        Ok(format!("remote-{}-{}", n, session.id))
    }

    async fn create_external_import(
        &self,
        _url: &str,
        filename: &str,
    ) -> Result<ImportTicket, UploadError> {
        let n = self.imports_created.fetch_add(1, Ordering::SeqCst);
        Ok(ImportTicket {
            id: format!("import-{}-{}", n, filename),
            status: ImportStatus::Pending,
        })
    }

    async fn poll_import(&self, _ticket_id: &str) -> Result<ImportPoll, UploadError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .import_script
            .lock()
            .pop_front()
            .unwrap_or(ImportStatus::Uploaded);
        Ok(ImportPoll {
            status,
            content_length: status.is_success().then_some(2048),
            content_type: status.is_success().then(|| "image/png".to_string()),
        })
    }
}
