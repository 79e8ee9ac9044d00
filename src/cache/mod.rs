// 上传结果缓存
//
// digest -> 远端句柄 的 TTL 缓存，保证同一内容至多上传一次：
// - 内存层：DashMap，启动时从持久化后端加载一次，之后增量写回
// - 单飞机制：同一 digest 的并发未命中只有第一个调用者真正上传，
//   其余等待在飞结果；不同 digest 之间互不竞争
// - 持久化损坏只降级为警告，本次运行按空缓存继续
//
// 条目一旦写入不再原地修改；过期条目与不存在等价，读到时顺手清除

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteCacheStore;
pub use store::{CacheStore, JsonFileStore};

use crate::config::{CacheBackend, CacheConfig};
use crate::dedup::ContentDigest;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 缓存条目
///
/// 不变量：未过期期间，一个 digest 恰好映射到一个 remote_id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 内容摘要
    pub digest: ContentDigest,
    /// 远端文件 ID
    pub remote_id: String,
    /// 展示文件名
    pub display_name: String,
    /// 文件大小（字节）
    pub size_bytes: u64,
    /// 内容类型
    pub content_type: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// 创建新条目，过期时间 = 现在 + ttl
    pub fn new(
        digest: ContentDigest,
        remote_id: String,
        display_name: String,
        size_bytes: u64,
        content_type: String,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            digest,
            remote_id,
            display_name,
            size_bytes,
            content_type,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// 是否已过期
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// 单飞判定结果
pub enum Flight {
    /// 本调用者是第一个未命中者，负责执行上传并通过 FlightGuard 回填结果
    Leader(FlightGuard),
    /// 已有同 digest 的上传在飞，等待其结果（None 表示在飞上传失败）
    Wait(broadcast::Receiver<Option<CacheEntry>>),
}

/// 单飞执行凭据
///
/// 领队必须调用 complete 或 fail 收尾；直接丢弃（panic、取消）
/// 等价于 fail，等待者会被释放而不是永久挂起
pub struct FlightGuard {
    cache: Arc<UploadCache>,
    digest: ContentDigest,
    tx: broadcast::Sender<Option<CacheEntry>>,
    settled: bool,
}

impl FlightGuard {
    /// 上传成功：写入缓存并广播给等待者
    pub fn complete(mut self, entry: CacheEntry) {
        self.cache.put(entry.clone());
        self.settle(Some(entry));
    }

    /// 上传失败：只释放等待者，不写缓存
    pub fn fail(mut self) {
        self.settle(None);
    }

    fn settle(&mut self, outcome: Option<CacheEntry>) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.cache.in_flight.remove(self.digest.as_str());
        // 没有等待者时发送失败是正常情况
        let _ = self.tx.send(outcome);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.settle(None);
    }
}

/// 上传结果缓存
pub struct UploadCache {
    /// 内存条目表
    entries: DashMap<String, CacheEntry>,
    /// 在飞上传表（digest -> 结果广播端）
    in_flight: DashMap<String, broadcast::Sender<Option<CacheEntry>>>,
    /// 持久化后端（None 表示纯内存模式）
    store: Option<Arc<dyn CacheStore>>,
    /// 清理时保留的最大条目数
    max_entries: usize,
}

impl UploadCache {
    /// 纯内存缓存（不持久化）
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            store: None,
            max_entries: 1000,
        })
    }

    /// 打开带持久化后端的缓存
    ///
    /// 加载时过滤已过期条目；后端损坏按空缓存处理并告警，绝不失败
    pub fn open(store: Arc<dyn CacheStore>, max_entries: usize) -> Arc<Self> {
        let entries = DashMap::new();
        match store.load() {
            Ok(loaded) => {
                let total = loaded.len();
                let mut kept = 0;
                for entry in loaded {
                    if !entry.is_expired() {
                        entries.insert(entry.digest.as_str().to_string(), entry);
                        kept += 1;
                    }
                }
                info!("缓存已加载: {} 条有效（共 {} 条）", kept, total);
            }
            Err(e) => {
                warn!("缓存持久化内容不可用，按空缓存继续: {:#}", e);
            }
        }

        Arc::new(Self {
            entries,
            in_flight: DashMap::new(),
            store: Some(store),
            max_entries,
        })
    }

    /// 按配置构建缓存
    ///
    /// SQLite 打不开时降级为纯内存模式，本次运行不持久化
    pub fn from_config(config: &CacheConfig) -> Arc<Self> {
        if !config.enabled {
            return Self::in_memory();
        }
        match config.backend {
            CacheBackend::Json => Self::open(
                Arc::new(JsonFileStore::new(&config.path)),
                config.max_entries,
            ),
            CacheBackend::Sqlite => match SqliteCacheStore::open(&config.path) {
                Ok(store) => Self::open(Arc::new(store), config.max_entries),
                Err(e) => {
                    warn!("打开缓存数据库失败，本次运行不持久化: {:#}", e);
                    Self::in_memory()
                }
            },
        }
    }

    /// 查询缓存
    ///
    /// 过期条目与不存在等价，并被顺手清除（内存 + 持久化）
    pub fn get(&self, digest: &ContentDigest) -> Option<CacheEntry> {
        let key = digest.as_str();
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired() {
            debug!("缓存条目已过期: {}", digest);
            self.entries.remove(key);
            if let Some(store) = &self.store {
                if let Err(e) = store.remove(key) {
                    warn!("清除过期缓存条目失败: {:#}", e);
                }
            }
            return None;
        }
        Some(entry)
    }

    /// 写入缓存（幂等，后写胜出）
    ///
    /// 持久化失败只告警，不影响上传结果本身
    pub fn put(&self, entry: CacheEntry) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert(&entry) {
                warn!("缓存持久化写入失败，继续以内存模式服务: {:#}", e);
            }
        }
        self.entries
            .insert(entry.digest.as_str().to_string(), entry);
    }

    /// 清理过期条目，并把总量裁剪到 max_entries 以内（保留最新）
    ///
    /// 返回删除的条目数
    pub fn evict_expired(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|kv| kv.value().is_expired())
            .map(|kv| kv.key().clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        let mut removed = expired.len();

        // 数量上限：按创建时间保留最新的 max_entries 条
        if self.entries.len() > self.max_entries {
            let mut all: Vec<(String, DateTime<Utc>)> = self
                .entries
                .iter()
                .map(|kv| (kv.key().clone(), kv.value().created_at))
                .collect();
            all.sort_by(|a, b| b.1.cmp(&a.1));
            for (key, _) in all.into_iter().skip(self.max_entries) {
                self.entries.remove(&key);
                removed += 1;
            }
        }

        if let Some(store) = &self.store {
            let remaining: Vec<CacheEntry> =
                self.entries.iter().map(|kv| kv.value().clone()).collect();
            if let Err(e) = store.replace_all(&remaining) {
                warn!("缓存清理写回失败: {:#}", e);
            }
        }

        if removed > 0 {
            info!("缓存清理完成，删除 {} 条，剩余 {} 条", removed, self.entries.len());
        }
        removed
    }

    /// 当前条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 单飞入口
    ///
    /// 同一 digest 同一时刻至多一个领队；竞争只发生在相同 digest 上
    pub fn begin(self: Arc<Self>, digest: &ContentDigest) -> Flight {
        use dashmap::mapref::entry::Entry;

        let tx = match self.in_flight.entry(digest.as_str().to_string()) {
            Entry::Occupied(occupied) => return Flight::Wait(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(4);
                vacant.insert(tx.clone());
                tx
            }
        };
        Flight::Leader(FlightGuard {
            cache: self,
            digest: digest.clone(),
            tx,
            settled: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::digest_str;

    fn entry_with_ttl(key: &str, ttl: chrono::Duration) -> CacheEntry {
        CacheEntry::new(
            digest_str(key),
            format!("remote-{}", key),
            format!("{}.png", key),
            100,
            "image/png".to_string(),
            ttl,
        )
    }

    fn entry(key: &str) -> CacheEntry {
        entry_with_ttl(key, chrono::Duration::hours(24))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = UploadCache::in_memory();
        let e = entry("a");
        cache.put(e.clone());
        assert_eq!(cache.get(&digest_str("a")), Some(e));
        assert_eq!(cache.get(&digest_str("b")), None);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = UploadCache::in_memory();
        cache.put(entry_with_ttl("a", chrono::Duration::seconds(-1)));
        assert_eq!(cache.get(&digest_str("a")), None);
        // 过期条目被顺手清除
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_is_idempotent_last_write_wins() {
        let cache = UploadCache::in_memory();
        cache.put(entry("a"));
        let mut e2 = entry("a");
        e2.remote_id = "remote-a-v2".to_string();
        cache.put(e2);
        assert_eq!(
            cache.get(&digest_str("a")).unwrap().remote_id,
            "remote-a-v2"
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_expired_counts() {
        let cache = UploadCache::in_memory();
        cache.put(entry_with_ttl("a", chrono::Duration::seconds(-1)));
        cache.put(entry_with_ttl("b", chrono::Duration::seconds(-1)));
        cache.put(entry("c"));
        assert_eq!(cache.evict_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_persisted_roundtrip_and_ttl_filter_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        {
            let store = Arc::new(JsonFileStore::new(&path));
            let cache = UploadCache::open(store, 1000);
            cache.put(entry("keep"));
            cache.put(entry_with_ttl("stale", chrono::Duration::seconds(-1)));
        }

        let store = Arc::new(JsonFileStore::new(&path));
        let cache = UploadCache::open(store, 1000);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&digest_str("keep")).is_some());
    }

    #[test]
    fn test_corrupted_store_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "]]] not json").unwrap();

        let cache = UploadCache::open(Arc::new(JsonFileStore::new(&path)), 1000);
        assert!(cache.is_empty());

        // 损坏不影响后续写入
        cache.put(entry("a"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_one_leader() {
        let cache = UploadCache::in_memory();
        let d = digest_str("content");

        let first = cache.clone().begin(&d);
        let second = cache.clone().begin(&d);

        let guard = match first {
            Flight::Leader(g) => g,
            Flight::Wait(_) => panic!("第一个调用者应当是领队"),
        };
        let mut rx = match second {
            Flight::Wait(rx) => rx,
            Flight::Leader(_) => panic!("第二个调用者应当等待"),
        };

        guard.complete(entry("content"));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.unwrap().remote_id, "remote-content");
        // 结果同时落入缓存
        assert!(cache.get(&d).is_some());
    }

    #[tokio::test]
    async fn test_single_flight_leader_failure_releases_waiters() {
        let cache = UploadCache::in_memory();
        let d = digest_str("content");

        let guard = match cache.clone().begin(&d) {
            Flight::Leader(g) => g,
            Flight::Wait(_) => unreachable!(),
        };
        let mut rx = match cache.clone().begin(&d) {
            Flight::Wait(rx) => rx,
            Flight::Leader(_) => unreachable!(),
        };

        guard.fail();
        assert!(rx.recv().await.unwrap().is_none());
        assert!(cache.get(&d).is_none());
        // 失败后 digest 可以再次成为领队
        assert!(matches!(cache.clone().begin(&d), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_single_flight_dropped_leader_releases_waiters() {
        let cache = UploadCache::in_memory();
        let d = digest_str("content");

        let guard = match cache.clone().begin(&d) {
            Flight::Leader(g) => g,
            Flight::Wait(_) => unreachable!(),
        };
        let mut rx = match cache.clone().begin(&d) {
            Flight::Wait(rx) => rx,
            Flight::Leader(_) => unreachable!(),
        };

        drop(guard);
        assert!(rx.recv().await.unwrap().is_none());
    }

    #[test]
    fn test_unrelated_digests_do_not_contend() {
        let cache = UploadCache::in_memory();
        let f1 = cache.clone().begin(&digest_str("a"));
        let f2 = cache.clone().begin(&digest_str("b"));
        assert!(matches!(f1, Flight::Leader(_)));
        assert!(matches!(f2, Flight::Leader(_)));
    }

    #[test]
    fn test_max_entries_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("cache.json")));
        let cache = UploadCache::open(store.clone(), 2);
        cache.put(entry("a"));
        cache.put(entry("b"));
        cache.put(entry("c"));

        let removed = cache.evict_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(store.load().unwrap().len(), 2);
    }
}
