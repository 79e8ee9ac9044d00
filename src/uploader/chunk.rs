// 上传分片管理
//
// 分片目的只有一个：让峰值内存与文件大小无关。
// 分片大小固定（默认 1MB），逐片读取、逐片发送，
// 不做断点续传，失败由上层整体重试

use crate::error::UploadError;
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// 按固定分片大小切分文件
///
/// 最后一片可能小于 chunk_size；total_size 为 0 时返回空列表
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Vec<Range<u64>> {
    assert!(chunk_size > 0, "分片大小必须大于 0");
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total_size {
        let end = (start + chunk_size).min(total_size);
        chunks.push(start..end);
        start = end;
    }
    chunks
}

/// 读取一个分片的数据
///
/// 读取失败（文件消失、权限被收回）归类为输入错误，不重试
pub async fn read_chunk(path: &Path, range: &Range<u64>) -> Result<Vec<u8>, UploadError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| UploadError::Input(format!("打开上传文件失败 {:?}: {}", path, e)))?;

    file.seek(std::io::SeekFrom::Start(range.start))
        .await
        .map_err(|e| UploadError::Input(format!("定位分片失败 {:?}: {}", path, e)))?;

    let len = (range.end - range.start) as usize;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer)
        .await
        .map_err(|e| UploadError::Input(format!("读取分片失败 {:?}: {}", path, e)))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn test_plan_exact_division() {
        let chunks = plan_chunks(4096, 1024);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], 0..1024);
        assert_eq!(chunks[3], 3072..4096);
    }

    #[test]
    fn test_plan_with_remainder() {
        let chunks = plan_chunks(2500, 1024);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], 2048..2500);
    }

    #[test]
    fn test_plan_small_file_single_chunk() {
        let chunks = plan_chunks(10, 1024);
        assert_eq!(chunks, vec![0..10]);
    }

    #[test]
    fn test_plan_empty_file() {
        assert!(plan_chunks(0, 1024).is_empty());
    }

    #[tokio::test]
    async fn test_read_chunk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let content: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&content)
            .unwrap();

        let chunks = plan_chunks(3000, 1024);
        let mut rebuilt = Vec::new();
        for range in &chunks {
            rebuilt.extend(read_chunk(&path, range).await.unwrap());
        }
        assert_eq!(rebuilt, content);
    }

    #[tokio::test]
    async fn test_read_chunk_missing_file_is_input_error() {
        let err = read_chunk(Path::new("/no/such/file"), &(0..10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::UploadErrorKind::Input);
    }

    proptest! {
        /// 分片必须连续、不重叠、恰好覆盖整个文件
        #[test]
        fn prop_chunks_cover_file(total in 1u64..20_000_000, chunk in 1u64..5_000_000) {
            let chunks = plan_chunks(total, chunk);
            prop_assert_eq!(chunks.first().map(|c| c.start), Some(0));
            prop_assert_eq!(chunks.last().map(|c| c.end), Some(total));
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            for c in &chunks {
                prop_assert!(c.end - c.start <= chunk);
                prop_assert!(c.start < c.end);
            }
        }
    }
}
