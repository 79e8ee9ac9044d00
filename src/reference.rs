// 文件引用模型
//
// 文件引用由外部的文档解析层产生，描述文档中发现的一个附件：
// 本地路径或外部 URL，外加类型和可选说明文字。
// 引用本身不可变，管线内部不会修改它。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 引用类型
///
/// 对应文档中附件的渲染类别，由解析层判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// 图片
    Image,
    /// 视频
    Video,
    /// 音频
    Audio,
    /// PDF 文档
    Pdf,
    /// 普通文件
    File,
    /// 嵌入内容
    Embed,
}

/// 引用定位符：本地路径或外部 URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// 本地文件路径
    LocalPath(PathBuf),
    /// 外部 URL（由远端自行抓取）
    Url(String),
}

impl Locator {
    /// 是否为外部 URL
    pub fn is_url(&self) -> bool {
        matches!(self, Locator::Url(_))
    }
}

/// 文件引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileReference {
    /// 引用类型
    pub kind: ReferenceKind,
    /// 定位符
    pub locator: Locator,
    /// 可选说明文字
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl FileReference {
    /// 创建本地文件引用
    pub fn local(kind: ReferenceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            locator: Locator::LocalPath(path.into()),
            caption: None,
        }
    }

    /// 创建外部 URL 引用
    pub fn url(kind: ReferenceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            locator: Locator::Url(url.into()),
            caption: None,
        }
    }

    /// 附加说明文字
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// 显示名称
    ///
    /// 本地路径取文件名；URL 取提取出的文件名
    pub fn display_name(&self) -> String {
        match &self.locator {
            Locator::LocalPath(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            Locator::Url(url) => filename_from_url(url),
        }
    }

    /// 小写扩展名（含点），没有则返回空串
    pub fn extension(&self) -> String {
        let name = self.display_name();
        extension_of(&name)
    }
}

/// 取文件名的小写扩展名（含点）
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// 从 URL 提取有意义的文件名
///
/// 规则：去掉查询串后取最后一段路径并做百分号解码；
/// 取不到带扩展名的段时按 URL 内容猜测一个占位名
pub fn filename_from_url(url: &str) -> String {
    let base = url.split(['?', '#']).next().unwrap_or(url);
    let segment = base.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());

    if !decoded.is_empty() && decoded.contains('.') && !decoded.starts_with("http") {
        return decoded;
    }

    // 没有可用的文件名段，按 URL 内容猜测
    let lower = url.to_lowercase();
    if lower.contains("image") {
        if lower.contains("png") {
            "image.png".to_string()
        } else if lower.contains("gif") {
            "image.gif".to_string()
        } else {
            // jpeg/jpg 或未知图片格式都回退到 jpg
            "image.jpg".to_string()
        }
    } else {
        "external_file.bin".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_local() {
        let r = FileReference::local(ReferenceKind::Image, "/data/photos/cat.PNG");
        assert_eq!(r.display_name(), "cat.PNG");
        assert_eq!(r.extension(), ".png");
    }

    #[test]
    fn test_filename_from_url_plain() {
        assert_eq!(
            filename_from_url("https://example.com/files/report.pdf"),
            "report.pdf"
        );
    }

    #[test]
    fn test_filename_from_url_strips_query() {
        assert_eq!(
            filename_from_url("https://example.com/a/b/data.csv?token=abc&x=1"),
            "data.csv"
        );
    }

    #[test]
    fn test_filename_from_url_percent_decoded() {
        assert_eq!(
            filename_from_url("https://example.com/docs/my%20notes.txt"),
            "my notes.txt"
        );
    }

    #[test]
    fn test_filename_from_url_guesses_image() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/image/view/12345"),
            "image.jpg"
        );
        assert_eq!(
            filename_from_url("https://cdn.example.com/image/png/12345"),
            "image.png"
        );
    }

    #[test]
    fn test_filename_from_url_fallback() {
        assert_eq!(
            filename_from_url("https://example.com/download"),
            "external_file.bin"
        );
    }

    #[test]
    fn test_reference_serde_roundtrip() {
        let r = FileReference::url(ReferenceKind::Pdf, "https://example.com/a.pdf")
            .with_caption("季度报告");
        let json = serde_json::to_string(&r).unwrap();
        let back: FileReference = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
