// 缓存持久化后端
//
// 内存中的缓存契约与持久化机制解耦：后端只负责加载和增量写入，
// TTL 判断、单飞、并发控制都在上层 UploadCache 完成。
//
// JSON 后端沿用单文件 map 格式，写入走临时文件 + 原子改名，
// 避免进程中断留下半截文件

use crate::cache::CacheEntry;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// 缓存持久化后端接口
///
/// 实现必须可在多线程间共享；单个操作内部自行保证一致性
pub trait CacheStore: Send + Sync {
    /// 加载全部条目
    ///
    /// 文件不存在视为空集；内容损坏返回错误，由上层降级处理
    fn load(&self) -> Result<Vec<CacheEntry>>;

    /// 写入或覆盖一个条目（幂等，后写胜出）
    fn upsert(&self, entry: &CacheEntry) -> Result<()>;

    /// 删除一个条目
    fn remove(&self, digest: &str) -> Result<()>;

    /// 用给定条目集合整体替换存储内容（清理时使用）
    fn replace_all(&self, entries: &[CacheEntry]) -> Result<()>;
}

/// 单 JSON 文件后端
///
/// 文件内容是 digest -> entry 的 map
#[derive(Debug)]
pub struct JsonFileStore {
    /// 存储文件路径
    path: PathBuf,
    /// 写入互斥（读-改-写必须串行）
    write_lock: parking_lot::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: parking_lot::Mutex::new(()),
        }
    }

    /// 读出当前文件内容；文件不存在返回空 map
    fn read_map(&self) -> Result<HashMap<String, CacheEntry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path).context("读取缓存文件失败")?;
        let map: HashMap<String, CacheEntry> =
            serde_json::from_str(&content).context("解析缓存文件失败")?;
        Ok(map)
    }

    /// 原子写入：先写临时文件再改名
    fn write_map(&self, map: &HashMap<String, CacheEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("创建缓存目录失败")?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        {
            let file = fs::File::create(&temp_path).context("创建缓存临时文件失败")?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, map).context("序列化缓存失败")?;
            writer.flush().context("刷新缓存临时文件失败")?;
        }
        fs::rename(&temp_path, &self.path).context("替换缓存文件失败")?;
        Ok(())
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.read_map()?.into_values().collect())
    }

    fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let _guard = self.write_lock.lock();
        // 读-改-写期间文件损坏时从空 map 重建，不让坏文件卡死写入
        let mut map = self.read_map().unwrap_or_default();
        map.insert(entry.digest.as_str().to_string(), entry.clone());
        self.write_map(&map)
    }

    fn remove(&self, digest: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map().unwrap_or_default();
        if map.remove(digest).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }

    fn replace_all(&self, entries: &[CacheEntry]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let map: HashMap<String, CacheEntry> = entries
            .iter()
            .map(|e| (e.digest.as_str().to_string(), e.clone()))
            .collect();
        self.write_map(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::digest_str;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(
            digest_str(key),
            format!("remote-{}", key),
            format!("{}.png", key),
            123,
            "image/png".to_string(),
            chrono::Duration::hours(24),
        )
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = JsonFileStore::new(&path);

        store.upsert(&entry("a")).unwrap();
        store.upsert(&entry("b")).unwrap();
        // 同 digest 覆盖写
        store.upsert(&entry("a")).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);

        // 新实例读同一文件
        let store2 = JsonFileStore::new(&path);
        assert_eq!(store2.load().unwrap().len(), 2);
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache.json"));
        let e = entry("a");
        store.upsert(&e).unwrap();
        store.remove(e.digest.as_str()).unwrap();
        assert!(store.load().unwrap().is_empty());
        // 删除不存在的条目不报错
        store.remove("missing").unwrap();
    }

    #[test]
    fn test_corrupted_file_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "not valid json {{{").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_upsert_recovers_from_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "garbage").unwrap();
        let store = JsonFileStore::new(&path);

        store.upsert(&entry("a")).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache.json"));
        store.upsert(&entry("a")).unwrap();
        store.upsert(&entry("b")).unwrap();

        store.replace_all(&[entry("c")]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].remote_id, "remote-c");
    }
}
