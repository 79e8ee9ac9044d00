// 内容去重
//
// 原理：
// 1. 本地文件按内容计算 SHA-256（流式读取，内存有界）
// 2. URL 引用按 URL 字符串本身计算 SHA-256（不在本地抓取字节）
// 3. 同一摘要的任务归为一组，每批只有一个代表任务真正上传，
//    其余跟随任务直接复制代表任务的结果
//
// 哈希碰撞不单独处理，摘要强度在设计威胁模型内视为无碰撞

use crate::error::UploadError;
use crate::reference::Locator;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// 哈希读取缓冲区大小
const HASH_BUF_SIZE: usize = 64 * 1024; // 64KB

/// 内容摘要（小写十六进制 SHA-256）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// 摘要的十六进制表示
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 从已有的十六进制串构造（用于持久化加载）
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 日志里只展示前 12 位，完整摘要太长
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// 计算一个引用的内容摘要
///
/// 文件 I/O 在阻塞线程池中执行；读取中途失败（文件消失、权限被收回）
/// 归类为输入错误，终态，不重试
pub async fn compute_digest(locator: &Locator) -> Result<ContentDigest, UploadError> {
    match locator {
        Locator::Url(url) => Ok(digest_str(url)),
        Locator::LocalPath(path) => {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || digest_file_sync(&path))
                .await
                .map_err(|e| UploadError::Input(format!("哈希任务执行失败: {}", e)))?
        }
    }
}

/// 对字符串计算摘要（URL 引用）
pub fn digest_str(value: &str) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    ContentDigest(hex::encode(hasher.finalize()))
}

/// 同步流式计算文件摘要
fn digest_file_sync(path: &Path) -> Result<ContentDigest, UploadError> {
    let file = std::fs::File::open(path)
        .map_err(|e| UploadError::Input(format!("无法打开文件 {:?}: {}", path, e)))?;
    let mut reader = std::io::BufReader::with_capacity(HASH_BUF_SIZE, file);

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUF_SIZE];
    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| UploadError::Input(format!("读取文件失败 {:?}: {}", path, e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ContentDigest(hex::encode(hasher.finalize())))
}

/// 摘要分组
///
/// representative 是组内第一个出现的任务下标（按提交顺序），
/// followers 是其余共享同一摘要的任务下标
#[derive(Debug, Clone)]
pub struct DigestGroup {
    /// 组内共享的摘要
    pub digest: ContentDigest,
    /// 代表任务下标
    pub representative: usize,
    /// 跟随任务下标
    pub followers: Vec<usize>,
}

/// 把 (任务下标, 摘要) 列表按摘要分组
///
/// 输出按代表任务下标排序，保持提交顺序
pub fn group_by_digest(digests: &[(usize, ContentDigest)]) -> Vec<DigestGroup> {
    let mut groups: HashMap<&ContentDigest, DigestGroup> = HashMap::new();
    let mut order: Vec<&ContentDigest> = Vec::new();

    for (index, digest) in digests {
        match groups.get_mut(digest) {
            Some(group) => group.followers.push(*index),
            None => {
                groups.insert(
                    digest,
                    DigestGroup {
                        digest: digest.clone(),
                        representative: *index,
                        followers: Vec::new(),
                    },
                );
                order.push(digest);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|d| groups.remove(d))
        .collect()
}
