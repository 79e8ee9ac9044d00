// 上传子系统
//
// - job: 任务记录与状态机
// - chunk: 分片规划与读取
// - retry: 统一重试策略
// - engine: 流式上传引擎（直传 / 外链导入）
// - manager: 批量调度器（有界并发、去重、缓存、重试、事件）

pub mod chunk;
pub mod engine;
pub mod job;
pub mod manager;
pub mod retry;

pub use chunk::{plan_chunks, read_chunk};
pub use engine::{PhaseFn, StreamingUploader, UploadPhase};
pub use job::{JobState, UploadJob, UploadResult};
pub use manager::{BatchReport, BatchUploadManager, JobOutcome};
pub use retry::RetryPolicy;
