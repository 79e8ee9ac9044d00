// SQLite 缓存后端
//
// 适合长期运行、条目较多的场景；单表，digest 为主键，
// 时间戳存 Unix 秒便于按 TTL 过滤

use crate::cache::store::CacheStore;
use crate::cache::CacheEntry;
use crate::dedup::ContentDigest;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// SQLite 缓存后端
pub struct SqliteCacheStore {
    /// SQLite 连接
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// 打开（或创建）数据库
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("创建缓存目录失败")?;
            }
        }

        let conn = Connection::open(db_path).context("打开缓存数据库失败")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    /// 初始化表结构
    fn init_tables(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS upload_cache (
                digest TEXT PRIMARY KEY,
                remote_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_upload_cache_expires ON upload_cache(expires_at)",
            [],
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("获取数据库锁失败: {}", e))
    }

    /// 行转换
    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
        let digest: String = row.get(0)?;
        let created_at: i64 = row.get(5)?;
        let expires_at: i64 = row.get(6)?;
        Ok(CacheEntry {
            digest: ContentDigest::from_hex(digest),
            remote_id: row.get(1)?,
            display_name: row.get(2)?,
            size_bytes: row.get::<_, i64>(3)? as u64,
            content_type: row.get(4)?,
            created_at: DateTime::from_timestamp(created_at, 0)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            expires_at: DateTime::from_timestamp(expires_at, 0)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        })
    }
}

impl CacheStore for SqliteCacheStore {
    fn load(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT digest, remote_id, display_name, size_bytes, content_type, created_at, expires_at FROM upload_cache",
        )?;
        let rows = stmt.query_map([], Self::row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO upload_cache
                (digest, remote_id, display_name, size_bytes, content_type, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                entry.digest.as_str(),
                entry.remote_id,
                entry.display_name,
                entry.size_bytes as i64,
                entry.content_type,
                entry.created_at.timestamp(),
                entry.expires_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, digest: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM upload_cache WHERE digest = ?1", params![digest])?;
        Ok(())
    }

    fn replace_all(&self, entries: &[CacheEntry]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM upload_cache", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO upload_cache
                    (digest, remote_id, display_name, size_bytes, content_type, created_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.digest.as_str(),
                    entry.remote_id,
                    entry.display_name,
                    entry.size_bytes as i64,
                    entry.content_type,
                    entry.created_at.timestamp(),
                    entry.expires_at.timestamp(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
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
            format!("{}.pdf", key),
            4096,
            "application/pdf".to_string(),
            chrono::Duration::hours(24),
        )
    }

    #[test]
    fn test_sqlite_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCacheStore::open(&dir.path().join("cache.db")).unwrap();

        store.upsert(&entry("a")).unwrap();
        store.upsert(&entry("b")).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);

        let a = loaded
            .iter()
            .find(|e| e.remote_id == "remote-a")
            .expect("entry a");
        assert_eq!(a.display_name, "a.pdf");
        assert_eq!(a.size_bytes, 4096);
        assert_eq!(a.content_type, "application/pdf");
    }

    #[test]
    fn test_sqlite_upsert_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCacheStore::open(&dir.path().join("cache.db")).unwrap();

        let mut e = entry("a");
        store.upsert(&e).unwrap();
        e.remote_id = "remote-a-v2".to_string();
        store.upsert(&e).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].remote_id, "remote-a-v2");
    }

    #[test]
    fn test_sqlite_remove_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCacheStore::open(&dir.path().join("cache.db")).unwrap();

        let a = entry("a");
        store.upsert(&a).unwrap();
        store.upsert(&entry("b")).unwrap();
        store.remove(a.digest.as_str()).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);

        store.replace_all(&[entry("c"), entry("d")]).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_sqlite_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteCacheStore::open(&path).unwrap();
            store.upsert(&entry("a")).unwrap();
        }
        let store = SqliteCacheStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
