//! 进度事件节流器
//!
//! 分片级进度更新频率可能非常高，按最小时间间隔放行，
//! 避免把观察者淹没。完成时刻的最终进度用 force 强制放行。

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度事件节流器
#[derive(Debug)]
pub struct ProgressThrottler {
    /// 最小放行间隔
    min_interval: Duration,
    /// 上次放行时刻
    last: Mutex<Option<Instant>>,
}

impl ProgressThrottler {
    /// 创建节流器
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// 使用指定毫秒间隔创建
    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 是否放行本次更新
    ///
    /// 距上次放行超过最小间隔（或从未放行过）时返回 true 并记录时刻
    pub fn allow(&self) -> bool {
        let mut last = self.last.lock();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// 强制放行（最后一个分片、任务完成时使用）
    pub fn force(&self) {
        *self.last.lock() = Some(Instant::now());
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_update_allowed() {
        let throttler = ProgressThrottler::with_millis(100);
        assert!(throttler.allow());
        assert!(!throttler.allow());
    }

    #[test]
    fn test_allowed_after_interval() {
        let throttler = ProgressThrottler::with_millis(30);
        assert!(throttler.allow());
        thread::sleep(Duration::from_millis(40));
        assert!(throttler.allow());
    }

    #[test]
    fn test_zero_interval_always_allows() {
        let throttler = ProgressThrottler::with_millis(0);
        assert!(throttler.allow());
        assert!(throttler.allow());
        assert!(throttler.allow());
    }
}
