// 进度事件模块
//
// 批量上传过程对外暴露一条可订阅的事件流，供 CLI/UI 观察者消费。
// 核心不关心观察者如何渲染，零个或多个订阅者都合法：
// 没有订阅者时发送事件直接丢弃，不算错误。

pub mod throttle;

pub use throttle::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS};

use crate::uploader::job::JobState;
use serde::Serialize;
use tokio::sync::broadcast;

/// 事件通道容量
///
/// 订阅者消费过慢时丢弃最旧事件（broadcast lagged），不阻塞上传
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 管线事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 批次开始
    BatchStarted {
        /// 引用总数
        total: usize,
    },
    /// 任务状态变更
    JobStatusChanged {
        /// 任务在批次中的下标
        index: usize,
        /// 引用总数
        total: usize,
        /// 展示文件名
        name: String,
        /// 新状态
        status: JobState,
        /// 失败原因（仅终态失败时携带）
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// 分片上传进度
    UploadProgress {
        /// 任务在批次中的下标
        index: usize,
        /// 展示文件名
        name: String,
        /// 已发送字节数
        bytes_sent: u64,
        /// 总字节数
        total_bytes: u64,
        /// 进度比例 0.0 - 1.0
        progress: f64,
    },
    /// 批次结束
    BatchFinished {
        /// 成功任务数（含缓存命中）
        succeeded: usize,
        /// 失败任务数
        failed: usize,
        /// 其中缓存命中数
        cached: usize,
        /// 被取消任务数
        cancelled: usize,
    },
}

/// 事件总线
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// 发布事件
    ///
    /// 没有订阅者时静默丢弃
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// 当前订阅者数量
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
