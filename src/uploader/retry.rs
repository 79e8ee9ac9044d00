// 统一重试策略
//
// 调度器对所有可重试操作套用同一套策略，不在各调用点散落重试循环。
// 指数退避：delay = base * 2^attempt，封顶 max_delay；
// 限流错误额外保证一个更长的最短等待时间

use crate::config::UploadConfig;
use crate::error::{UploadError, UploadErrorKind};
use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始退避延迟
    pub base_delay: Duration,
    /// 最大退避延迟
    pub max_delay: Duration,
    /// 限流时的最短等待时间
    pub rate_limit_floor: Duration,
}

impl RetryPolicy {
    /// 从上传配置构建
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            rate_limit_floor: Duration::from_millis(config.rate_limit_backoff_ms),
        }
    }

    /// 第 attempt 次尝试（从 0 计）失败后是否还应重试
    ///
    /// 只有瞬时类错误消耗重试额度；终态错误立即放弃
    pub fn should_retry(&self, error: &UploadError, attempt: u32) -> bool {
        error.is_retriable() && attempt + 1 < self.max_attempts
    }

    /// 计算第 attempt 次失败后的退避延迟
    ///
    /// # 延迟序列（base=500ms）
    /// - attempt=0: 500ms
    /// - attempt=1: 1000ms
    /// - attempt=2: 2000ms
    /// - 封顶 max_delay
    pub fn backoff_delay(&self, attempt: u32, kind: &UploadErrorKind) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay = self
            .base_delay
            .saturating_mul(factor.min(u32::MAX as u64) as u32)
            .min(self.max_delay);

        if matches!(kind, UploadErrorKind::RateLimited) {
            delay.max(self.rate_limit_floor)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}
