// 上传任务定义
//
// 任务只在一次批量运行内存在：创建、状态流转、随批次结束丢弃。
// 状态机：
//   Pending → Validating → {Failed | Hashing}
//   Hashing → {CacheHit | Uploading | Failed | Cancelled}
//   CacheHit → Succeeded
//   Uploading → {Succeeded | AwaitingRemoteImport | Retrying | Failed | Cancelled}
//   AwaitingRemoteImport → {Succeeded | Retrying | Failed | Cancelled}
//   Retrying → {Uploading | Failed | Cancelled}
// Succeeded / Failed / Cancelled 为终态；未开始的任务取消时从 Pending 直达 Cancelled

use crate::dedup::ContentDigest;
use crate::error::UploadError;
use crate::reference::FileReference;
use crate::validate::ValidatedFile;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// 等待中
    Pending,
    /// 校验中
    Validating,
    /// 哈希计算中
    Hashing,
    /// 缓存命中
    CacheHit,
    /// 上传中
    Uploading,
    /// 等待远端抓取外链
    AwaitingRemoteImport,
    /// 等待重试
    Retrying,
    /// 成功
    Succeeded,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl JobState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// 状态流转是否合法
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (*self, next) {
            (Pending, Validating) | (Pending, Cancelled) => true,
            (Validating, Hashing) | (Validating, Failed) => true,
            (Hashing, CacheHit) | (Hashing, Uploading) | (Hashing, Failed) | (Hashing, Cancelled) => {
                true
            }
            (CacheHit, Succeeded) => true,
            (Uploading, Succeeded)
            | (Uploading, AwaitingRemoteImport)
            | (Uploading, Retrying)
            | (Uploading, Failed)
            | (Uploading, Cancelled) => true,
            (AwaitingRemoteImport, Succeeded)
            | (AwaitingRemoteImport, Retrying)
            | (AwaitingRemoteImport, Failed)
            | (AwaitingRemoteImport, Cancelled) => true,
            (Retrying, Uploading) | (Retrying, Failed) | (Retrying, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Hashing => "hashing",
            Self::CacheHit => "cache_hit",
            Self::Uploading => "uploading",
            Self::AwaitingRemoteImport => "awaiting_remote_import",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// 单个引用的上传结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    /// 远端文件 ID
    pub remote_id: String,
    /// 原始文件名（.txt 变通前的名字）
    pub original_name: String,
    /// 内容类型
    pub content_type: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 是否来自缓存（本次没有发生网络上传）
    pub cached: bool,
}

/// 上传任务
///
/// 任务记录归处理它的 worker 独占，缓存之外不需要共享可变状态
#[derive(Debug)]
pub struct UploadJob {
    /// 任务 ID
    pub id: String,
    /// 在批次中的下标（即提交顺序）
    pub index: usize,
    /// 对应的文件引用
    pub reference: FileReference,
    /// 任务状态
    pub state: JobState,
    /// 已尝试次数
    pub attempts: u32,
    /// 最近一次错误
    pub last_error: Option<UploadError>,
    /// 内容摘要（哈希阶段后可用）
    pub digest: Option<ContentDigest>,
    /// 校验结果（校验阶段后可用）
    pub validated: Option<ValidatedFile>,
    /// 上传结果（成功终态时可用）
    pub result: Option<UploadResult>,
}

impl UploadJob {
    /// 创建新任务
    pub fn new(index: usize, reference: FileReference) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            index,
            reference,
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            digest: None,
            validated: None,
            result: None,
        }
    }

    /// 状态流转
    ///
    /// 非法流转属于编程错误，debug 构建直接断言
    pub fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "非法状态流转: {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    /// 标记终态失败
    pub fn fail(&mut self, error: UploadError) {
        self.last_error = Some(error);
        self.transition(JobState::Failed);
    }

    /// 展示文件名
    pub fn display_name(&self) -> String {
        match &self.validated {
            Some(v) => v.original_name.clone(),
            None => self.reference.display_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceKind;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        use JobState::*;
        assert!(Pending.can_transition_to(Validating));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Validating.can_transition_to(Hashing));
        assert!(Validating.can_transition_to(Failed));
        assert!(Hashing.can_transition_to(CacheHit));
        assert!(Hashing.can_transition_to(Uploading));
        assert!(CacheHit.can_transition_to(Succeeded));
        assert!(Uploading.can_transition_to(AwaitingRemoteImport));
        assert!(Uploading.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Uploading));
        assert!(AwaitingRemoteImport.can_transition_to(Succeeded));
    }

    #[test]
    fn test_illegal_transitions() {
        use JobState::*;
        assert!(!Pending.can_transition_to(Uploading));
        assert!(!Succeeded.can_transition_to(Uploading));
        assert!(!Failed.can_transition_to(Retrying));
        assert!(!CacheHit.can_transition_to(Uploading));
        assert!(!Retrying.can_transition_to(Succeeded));
    }

    #[test]
    fn test_job_lifecycle() {
        let r = FileReference::local(ReferenceKind::File, "/tmp/a.pdf");
        let mut job = UploadJob::new(0, r);
        assert_eq!(job.state, JobState::Pending);

        job.transition(JobState::Validating);
        job.transition(JobState::Hashing);
        job.transition(JobState::Uploading);
        job.transition(JobState::Retrying);
        job.transition(JobState::Uploading);
        job.transition(JobState::Succeeded);
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_fail_records_error() {
        let r = FileReference::local(ReferenceKind::File, "/tmp/a.pdf");
        let mut job = UploadJob::new(0, r);
        job.transition(JobState::Validating);
        job.fail(UploadError::Validation("too big".into()));
        assert_eq!(job.state, JobState::Failed);
        assert!(job.last_error.is_some());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&JobState::AwaitingRemoteImport).unwrap();
        assert_eq!(json, "\"awaiting_remote_import\"");
    }
}
