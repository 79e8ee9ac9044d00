//! 日志系统配置
//!
//! 支持控制台输出和文件持久化（按天滚动），自动清理过期日志。
//! 库本身只通过 tracing 发事件，初始化由嵌入方决定是否调用。

use crate::config::LogConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "doc-uplink.log";

/// 初始化日志系统
///
/// 控制台始终输出；`config.enabled` 时追加文件输出（按天滚动）。
/// 返回的 WorkerGuard 必须由调用方持有到进程结束，否则缓冲日志会丢失。
///
/// 日志级别优先使用 RUST_LOG 环境变量，其次使用配置中的 level
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let console_layer = fmt::layer()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(true);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
            .ok();
        return Ok(None);
    }

    fs::create_dir_all(&config.log_dir).context("创建日志目录失败")?;

    // 启动时顺手清理过期日志
    if let Err(e) = cleanup_old_logs(&config.log_dir, config.retention_days) {
        warn!("清理过期日志失败: {:#}", e);
    }

    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!("日志文件输出已启用: {:?}", config.log_dir);
    Ok(Some(guard))
}

/// 清理超过保留天数的日志文件
///
/// 只处理本库前缀的文件，目录里的其他文件不动
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days as u64 * 24 * 3600))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in fs::read_dir(log_dir).context("读取日志目录失败")? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if modified < cutoff {
            if fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }
    Ok(removed)
}
