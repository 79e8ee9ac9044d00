// 上传前校验
//
// 在任何网络 I/O 之前把无效任务拦下来。检查顺序：
// 1. 定位符可解析（本地文件存在且可读；URL 协议在允许范围内）
// 2. 大小在上限内（只走 stat，不读内容）
// 3. 扩展名在允许策略内
//
// 校验失败是终态，不参与重试，以结构化错误返回，绝不 panic

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::reference::{extension_of, FileReference, Locator};
use std::fs;

/// 校验通过的文件信息
///
/// 携带后续上传需要的全部元信息，避免重复 stat
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    /// 原始文件名（展示和结果回报用）
    pub original_name: String,
    /// 实际上传用的文件名（可能追加了 .txt 后缀）
    pub upload_name: String,
    /// MIME 类型
    pub content_type: String,
    /// 文件大小（URL 引用在导入完成前未知，记 0）
    pub size_bytes: u64,
    /// 是否应用了 .txt 后缀变通
    pub workaround_applied: bool,
}

/// 文件校验器
#[derive(Debug, Clone)]
pub struct FileValidator {
    config: UploadConfig,
}

impl FileValidator {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    /// 校验一个文件引用
    ///
    /// 本函数不做任何网络 I/O
    pub fn validate(&self, reference: &FileReference) -> Result<ValidatedFile, UploadError> {
        match &reference.locator {
            Locator::LocalPath(path) => self.validate_local(reference, path),
            Locator::Url(url) => self.validate_url(reference, url),
        }
    }

    /// 校验本地文件
    fn validate_local(
        &self,
        reference: &FileReference,
        path: &std::path::Path,
    ) -> Result<ValidatedFile, UploadError> {
        let metadata = fs::metadata(path)
            .map_err(|e| UploadError::Input(format!("无法访问文件 {:?}: {}", path, e)))?;

        if !metadata.is_file() {
            return Err(UploadError::Input(format!("不是普通文件: {:?}", path)));
        }

        // 可读性检查：打开后立即关闭，不读内容
        fs::File::open(path)
            .map_err(|e| UploadError::Input(format!("文件不可读 {:?}: {}", path, e)))?;

        let size = metadata.len();
        if size == 0 {
            return Err(UploadError::Validation(format!("文件为空: {:?}", path)));
        }
        if size > self.config.max_file_size {
            return Err(UploadError::Validation(format!(
                "文件过大: {} 字节（上限 {} 字节）",
                size, self.config.max_file_size
            )));
        }

        let original_name = reference.display_name();
        let ext = extension_of(&original_name);
        if !self.config.is_allowed_extension(&ext) {
            return Err(UploadError::Validation(format!(
                "不支持的文件类型: {}",
                if ext.is_empty() { "(无扩展名)" } else { &ext }
            )));
        }

        Ok(self.resolve_names(original_name, &ext, size))
    }

    /// 校验外部 URL
    ///
    /// 只做语法检查，大小与内容由远端抓取时裁决
    fn validate_url(
        &self,
        reference: &FileReference,
        url: &str,
    ) -> Result<ValidatedFile, UploadError> {
        if url.is_empty() {
            return Err(UploadError::Validation("URL 为空".to_string()));
        }

        let scheme = url
            .split_once("://")
            .map(|(s, rest)| (s, rest))
            .filter(|(_, rest)| !rest.is_empty())
            .map(|(s, _)| s.to_lowercase())
            .ok_or_else(|| UploadError::Validation(format!("URL 格式不合法: {}", url)))?;

        if !self.config.is_allowed_scheme(&scheme) {
            return Err(UploadError::Validation(format!(
                "不允许的 URL 协议: {}",
                scheme
            )));
        }

        let original_name = reference.display_name();
        let ext = extension_of(&original_name);
        Ok(self.resolve_names(original_name, &ext, 0))
    }

    /// 解析上传名和 MIME（含 .txt 后缀变通）
    fn resolve_names(&self, original_name: String, ext: &str, size: u64) -> ValidatedFile {
        let workaround = self.config.needs_extension_workaround(ext);
        let (upload_name, content_type) = if workaround {
            (format!("{}.txt", original_name), "text/plain".to_string())
        } else {
            (
                original_name.clone(),
                self.config.mime_type_for(ext).to_string(),
            )
        };

        ValidatedFile {
            original_name,
            upload_name,
            content_type,
            size_bytes: size,
            workaround_applied: workaround,
        }
    }
}
