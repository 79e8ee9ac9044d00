// 批量上传调度器
//
// 负责一次批量运行的完整编排：
// - 校验 -> 哈希（独立并发池）-> 按摘要分组 -> 上传（有界并发池）
// - 准入按提交顺序，池满时阻塞（背压），绝不丢任务
// - 统一重试策略包住所有可重试操作
// - 单个任务失败绝不取消或阻塞其他任务，批次总是带着完整结果收尾
// - 取消是协作式的：未开始的任务直达 Cancelled，在飞任务在分片/轮询边界停下

use crate::cache::{CacheEntry, Flight, UploadCache};
use crate::config::PipelineConfig;
use crate::dedup::{compute_digest, group_by_digest, ContentDigest, DigestGroup};
use crate::error::UploadError;
use crate::events::{EventBus, PipelineEvent, ProgressThrottler};
use crate::reference::FileReference;
use crate::remote::RemoteApi;
use crate::uploader::engine::{StreamingUploader, UploadPhase};
use crate::uploader::job::{JobState, UploadJob, UploadResult};
use crate::uploader::retry::RetryPolicy;
use crate::validate::{FileValidator, ValidatedFile};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单个引用的最终结局
#[derive(Debug)]
pub struct JobOutcome {
    /// 对应的文件引用
    pub reference: FileReference,
    /// 终态
    pub state: JobState,
    /// 实际尝试次数
    pub attempts: u32,
    /// 结果或失败原因
    pub outcome: Result<UploadResult, UploadError>,
}

/// 批量运行报告
///
/// outcomes 与提交顺序一一对应，永远是完整的：
/// 不存在只覆盖部分引用的"半截"报告
#[derive(Debug)]
pub struct BatchReport {
    /// 每个引用的结局（按提交顺序）
    pub outcomes: Vec<JobOutcome>,
}

impl BatchReport {
    /// 成功任务数（含缓存命中）
    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == JobState::Succeeded)
            .count()
    }

    /// 失败任务数
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == JobState::Failed)
            .count()
    }

    /// 被取消任务数
    pub fn cancelled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == JobState::Cancelled)
            .count()
    }

    /// 其中未发生网络上传、直接复用缓存的任务数
    pub fn cached_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.outcome, Ok(r) if r.cached))
            .count()
    }

    /// 按引用查询结局（重复引用返回第一个）
    pub fn outcome_for(&self, reference: &FileReference) -> Option<&JobOutcome> {
        self.outcomes.iter().find(|o| &o.reference == reference)
    }
}

/// 批量上传调度器
pub struct BatchUploadManager {
    /// 校验器
    validator: FileValidator,
    /// 流式上传引擎
    uploader: Arc<StreamingUploader>,
    /// 上传结果缓存
    cache: Arc<UploadCache>,
    /// 事件总线
    events: EventBus,
    /// 重试策略
    retry: RetryPolicy,
    /// 最大同时上传任务数
    max_concurrent_uploads: usize,
    /// 最大同时哈希任务数
    max_concurrent_hashing: usize,
    /// 缓存条目 TTL
    cache_ttl: chrono::Duration,
    /// 取消令牌
    cancel_token: CancellationToken,
}

impl BatchUploadManager {
    /// 创建调度器
    pub fn new(
        client: Arc<dyn RemoteApi>,
        cache: Arc<UploadCache>,
        config: &PipelineConfig,
    ) -> Self {
        let uploader = Arc::new(StreamingUploader::new(
            client,
            config.upload.stream_chunk_size,
            config.import.clone(),
        ));
        Self {
            validator: FileValidator::new(config.upload.clone()),
            uploader,
            cache,
            events: EventBus::new(),
            retry: RetryPolicy::from_config(&config.upload),
            max_concurrent_uploads: config.upload.max_concurrent_uploads.max(1),
            max_concurrent_hashing: config.upload.max_concurrent_hashing.max(1),
            cache_ttl: config.cache.ttl(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// 订阅进度事件流
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// 请求取消当前批次（协作式）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 取消令牌（供嵌入方组合自己的取消逻辑）
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 执行一次批量上传
    ///
    /// 无论中途发生什么，返回的报告覆盖每一个提交的引用
    pub async fn run(&self, references: Vec<FileReference>) -> BatchReport {
        let total = references.len();
        info!("批量上传开始: {} 个引用", total);
        self.events.emit(PipelineEvent::BatchStarted { total });

        // 兜底引用备份：worker 异常退出时仍能产出完整报告
        let fallback_refs = references.clone();

        let mut jobs: Vec<UploadJob> = references
            .into_iter()
            .enumerate()
            .map(|(index, reference)| UploadJob::new(index, reference))
            .collect();

        self.validate_phase(&mut jobs, total);
        self.hash_phase(&mut jobs, total).await;

        // 按摘要分组：每个摘要只有代表任务进入上传调度
        let pairs: Vec<(usize, ContentDigest)> = jobs
            .iter()
            .filter(|j| j.state == JobState::Hashing)
            .filter_map(|j| j.digest.clone().map(|d| (j.index, d)))
            .collect();
        let groups = group_by_digest(&pairs);
        debug!("去重分组: {} 个引用 -> {} 个上传组", pairs.len(), groups.len());

        let mut slots: Vec<Option<UploadJob>> = jobs.into_iter().map(Some).collect();
        self.upload_phase(&mut slots, &groups, total).await;
        self.resolve_followers(&mut slots, &groups, total);
        self.sweep_unfinished(&mut slots, total);

        let report = Self::build_report(slots, &fallback_refs);
        self.events.emit(PipelineEvent::BatchFinished {
            succeeded: report.succeeded_count(),
            failed: report.failed_count(),
            cached: report.cached_count(),
            cancelled: report.cancelled_count(),
        });
        info!(
            "批量上传结束: 成功 {} / 失败 {} / 取消 {}（缓存命中 {}）",
            report.succeeded_count(),
            report.failed_count(),
            report.cancelled_count(),
            report.cached_count()
        );
        report
    }

    /// 校验阶段：不做任何网络 I/O
    fn validate_phase(&self, jobs: &mut [UploadJob], total: usize) {
        for job in jobs.iter_mut() {
            if self.cancel_token.is_cancelled() {
                job.transition(JobState::Cancelled);
                emit_job_status(&self.events, job, total);
                continue;
            }
            job.transition(JobState::Validating);
            match self.validator.validate(&job.reference) {
                Ok(validated) => job.validated = Some(validated),
                Err(e) => {
                    warn!("校验拒绝 [{}]: {}", job.display_name(), e);
                    job.fail(e);
                    emit_job_status(&self.events, job, total);
                }
            }
        }
    }

    /// 哈希阶段：独立并发池计算内容摘要
    async fn hash_phase(&self, jobs: &mut Vec<UploadJob>, total: usize) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_hashing));
        let mut join_set: JoinSet<(usize, Result<ContentDigest, UploadError>)> = JoinSet::new();

        for job in jobs.iter_mut().filter(|j| !j.state.is_terminal()) {
            job.transition(JobState::Hashing);
            let locator = job.reference.locator.clone();
            let index = job.index;
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(UploadError::Input("哈希池已关闭".into()))),
                };
                (index, compute_digest(&locator).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, Ok(digest))) => jobs[index].digest = Some(digest),
                Ok((index, Err(e))) => {
                    warn!("哈希失败 [{}]: {}", jobs[index].display_name(), e);
                    jobs[index].fail(e);
                    emit_job_status(&self.events, &jobs[index], total);
                }
                Err(e) => error!("哈希任务异常退出: {}", e),
            }
        }

        // 异常退出的哈希任务兜底
        for job in jobs
            .iter_mut()
            .filter(|j| j.state == JobState::Hashing && j.digest.is_none())
        {
            job.fail(UploadError::Input("哈希任务异常退出".into()));
            emit_job_status(&self.events, job, total);
        }
    }

    /// 上传阶段：代表任务进入有界并发池
    ///
    /// 准入在这里阻塞（acquire 在 spawn 之前），池满即背压，按提交顺序放行
    async fn upload_phase(
        &self,
        slots: &mut [Option<UploadJob>],
        groups: &[DigestGroup],
        total: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_uploads));
        let mut join_set: JoinSet<UploadJob> = JoinSet::new();

        for group in groups {
            if self.cancel_token.is_cancelled() {
                // 其余任务由收尾阶段统一标记 Cancelled
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(job) = slots[group.representative].take() else {
                continue;
            };
            let worker = WorkerContext {
                uploader: self.uploader.clone(),
                cache: self.cache.clone(),
                events: self.events.clone(),
                retry: self.retry.clone(),
                cancel: self.cancel_token.clone(),
                ttl: self.cache_ttl,
            };
            join_set.spawn(async move {
                let _permit = permit;
                worker.execute(job, total).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(job) => {
                    let index = job.index;
                    slots[index] = Some(job);
                }
                Err(e) => error!("上传任务异常退出: {}", e),
            }
        }
    }

    /// 跟随任务解析：复制代表任务的结局，不发生网络操作
    fn resolve_followers(
        &self,
        slots: &mut [Option<UploadJob>],
        groups: &[DigestGroup],
        total: usize,
    ) {
        for group in groups {
            if group.followers.is_empty() {
                continue;
            }

            // 代表任务的结局快照
            let rep_outcome: Option<(JobState, Option<UploadResult>, Option<UploadError>)> =
                slots[group.representative].as_ref().map(|rep| {
                    (rep.state, rep.result.clone(), rep.last_error.clone())
                });

            for &follower_index in &group.followers {
                let Some(job) = slots[follower_index].as_mut() else {
                    continue;
                };
                if job.state.is_terminal() {
                    continue;
                }
                match &rep_outcome {
                    Some((JobState::Succeeded, Some(result), _)) => {
                        job.transition(JobState::CacheHit);
                        job.result = Some(result.clone());
                        job.transition(JobState::Succeeded);
                    }
                    Some((JobState::Cancelled, _, _)) => {
                        job.transition(JobState::Cancelled);
                    }
                    Some((_, _, error)) => {
                        job.fail(
                            error
                                .clone()
                                .unwrap_or_else(|| UploadError::Input("代表任务失败".into())),
                        );
                    }
                    None => {
                        job.fail(UploadError::Input("代表任务异常退出".into()));
                    }
                }
                emit_job_status(&self.events, job, total);
            }
        }
    }

    /// 收尾：所有仍未到终态的任务统一标记
    fn sweep_unfinished(&self, slots: &mut [Option<UploadJob>], total: usize) {
        let cancelled = self.cancel_token.is_cancelled();
        for job in slots.iter_mut().flatten() {
            if job.state.is_terminal() {
                continue;
            }
            if cancelled {
                job.transition(JobState::Cancelled);
            } else {
                job.fail(UploadError::Input("任务未被调度".into()));
            }
            emit_job_status(&self.events, job, total);
        }
    }

    /// 组装最终报告（与提交顺序一一对应）
    fn build_report(slots: Vec<Option<UploadJob>>, fallback_refs: &[FileReference]) -> BatchReport {
        let outcomes = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Some(mut job) => {
                    let outcome = match job.state {
                        JobState::Succeeded => match job.result.take() {
                            Some(result) => Ok(result),
                            None => Err(UploadError::Input("缺少上传结果".into())),
                        },
                        JobState::Cancelled => Err(UploadError::Cancelled),
                        _ => Err(job
                            .last_error
                            .take()
                            .unwrap_or_else(|| UploadError::Input("任务未完成".into()))),
                    };
                    JobOutcome {
                        reference: job.reference,
                        state: job.state,
                        attempts: job.attempts,
                        outcome,
                    }
                }
                // worker 异常退出导致任务记录丢失
                None => JobOutcome {
                    reference: fallback_refs[index].clone(),
                    state: JobState::Failed,
                    attempts: 0,
                    outcome: Err(UploadError::Input("任务异常退出".into())),
                },
            })
            .collect();
        BatchReport { outcomes }
    }
}

/// 发布任务状态事件
fn emit_job_status(events: &EventBus, job: &UploadJob, total: usize) {
    events.emit(PipelineEvent::JobStatusChanged {
        index: job.index,
        total,
        name: job.display_name(),
        status: job.state,
        error: job.last_error.as_ref().map(|e| e.to_string()),
    });
}

/// 上传 worker 的运行环境
///
/// 任务记录归 worker 独占；共享可变状态只有缓存
struct WorkerContext {
    uploader: Arc<StreamingUploader>,
    cache: Arc<UploadCache>,
    events: EventBus,
    retry: RetryPolicy,
    cancel: CancellationToken,
    ttl: chrono::Duration,
}

impl WorkerContext {
    /// 执行一个代表任务直到终态
    async fn execute(self, mut job: UploadJob, total: usize) -> UploadJob {
        if self.cancel.is_cancelled() {
            job.transition(JobState::Cancelled);
            emit_job_status(&self.events, &job, total);
            return job;
        }

        let (Some(digest), Some(validated)) = (job.digest.clone(), job.validated.clone()) else {
            job.fail(UploadError::Input("任务缺少摘要或校验信息".into()));
            emit_job_status(&self.events, &job, total);
            return job;
        };

        loop {
            // 快路径：缓存命中（过期条目在 get 内部被当作未命中清除）
            if let Some(entry) = self.cache.get(&digest) {
                debug!("缓存命中 [{}]: {}", job.display_name(), entry.remote_id);
                self.resolve_cached(&mut job, &entry, &validated, total);
                return job;
            }

            match self.cache.clone().begin(&digest) {
                // 同摘要已有在飞上传（并发批次场景），等待其结果
                Flight::Wait(mut rx) => match rx.recv().await {
                    Ok(Some(entry)) => {
                        self.resolve_cached(&mut job, &entry, &validated, total);
                        return job;
                    }
                    // 在飞上传失败：回到循环头重新竞争领队资格
                    _ => continue,
                },
                Flight::Leader(guard) => {
                    // 领队二次确认：未命中与拿到领队资格之间，同摘要的
                    // 在飞上传可能恰好完成并落入缓存
                    if let Some(entry) = self.cache.get(&digest) {
                        drop(guard);
                        self.resolve_cached(&mut job, &entry, &validated, total);
                        return job;
                    }
                    return self.lead_upload(job, guard, &digest, &validated, total).await;
                }
            }
        }
    }

    /// 以缓存条目收尾一个任务（不发生网络操作）
    fn resolve_cached(
        &self,
        job: &mut UploadJob,
        entry: &CacheEntry,
        validated: &ValidatedFile,
        total: usize,
    ) {
        job.transition(JobState::CacheHit);
        emit_job_status(&self.events, job, total);
        job.result = Some(result_from_entry(entry, validated));
        job.transition(JobState::Succeeded);
        emit_job_status(&self.events, job, total);
    }

    /// 作为领队真正执行上传（带统一重试）
    async fn lead_upload(
        &self,
        mut job: UploadJob,
        guard: crate::cache::FlightGuard,
        digest: &ContentDigest,
        validated: &ValidatedFile,
        total: usize,
    ) -> UploadJob {
        let index = job.index;
        let name = job.display_name();
        let events = self.events.clone();
        let throttler = ProgressThrottler::default();
        let phase_name = name.clone();
        let phase_fn = move |phase: UploadPhase| match phase {
            UploadPhase::ChunkSent {
                bytes_sent,
                total_bytes,
            } => {
                let is_last = bytes_sent == total_bytes;
                if is_last || throttler.allow() {
                    if is_last {
                        throttler.force();
                    }
                    events.emit(PipelineEvent::UploadProgress {
                        index,
                        name: phase_name.clone(),
                        bytes_sent,
                        total_bytes,
                        progress: if total_bytes > 0 {
                            bytes_sent as f64 / total_bytes as f64
                        } else {
                            1.0
                        },
                    });
                }
            }
            UploadPhase::AwaitingImport => {
                events.emit(PipelineEvent::JobStatusChanged {
                    index,
                    total,
                    name: phase_name.clone(),
                    status: JobState::AwaitingRemoteImport,
                    error: None,
                });
            }
        };

        let mut attempt: u32 = 0;
        loop {
            job.transition(JobState::Uploading);
            job.attempts = attempt + 1;
            emit_job_status(&self.events, &job, total);

            let result = self
                .uploader
                .upload(&job.reference.locator, validated, &self.cancel, &phase_fn)
                .await;

            match result {
                Ok(result) => {
                    let entry = CacheEntry::new(
                        digest.clone(),
                        result.remote_id.clone(),
                        validated.original_name.clone(),
                        result.size,
                        result.content_type.clone(),
                        self.ttl,
                    );
                    guard.complete(entry);
                    job.result = Some(result);
                    job.transition(JobState::Succeeded);
                    emit_job_status(&self.events, &job, total);
                    return job;
                }
                Err(UploadError::Cancelled) => {
                    guard.fail();
                    job.transition(JobState::Cancelled);
                    emit_job_status(&self.events, &job, total);
                    return job;
                }
                Err(e) => {
                    if self.retry.should_retry(&e, attempt) {
                        let delay = self.retry.backoff_delay(attempt, &e.kind());
                        warn!(
                            "上传失败 [{}]（第 {} 次尝试），{:?} 后重试: {}",
                            name,
                            attempt + 1,
                            delay,
                            e
                        );
                        job.last_error = Some(e);
                        job.transition(JobState::Retrying);
                        emit_job_status(&self.events, &job, total);
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                guard.fail();
                                job.transition(JobState::Cancelled);
                                emit_job_status(&self.events, &job, total);
                                return job;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    } else {
                        warn!("上传终态失败 [{}]: {}", name, e);
                        guard.fail();
                        job.fail(e);
                        emit_job_status(&self.events, &job, total);
                        return job;
                    }
                }
            }
        }
    }
}

/// 从缓存条目构造结果（cached = true）
fn result_from_entry(entry: &CacheEntry, validated: &ValidatedFile) -> UploadResult {
    UploadResult {
        remote_id: entry.remote_id.clone(),
        original_name: validated.original_name.clone(),
        content_type: entry.content_type.clone(),
        size: entry.size_bytes,
        cached: true,
    }
}
