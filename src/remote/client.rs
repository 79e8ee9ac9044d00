// 远端 API 客户端实现
//
// 基于 reqwest 的薄封装：
// - Bearer 认证 + API 版本头
// - 所有请求共用一个有界超时
// - HTTP 状态码统一分类为管线错误

use crate::config::RemoteConfig;
use crate::error::UploadError;
use crate::remote::api::RemoteApi;
use crate::remote::types::{ImportPoll, ImportStatus, ImportTicket, UploadSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

/// API 版本头名称
const API_VERSION_HEADER: &str = "X-Api-Version";

/// 远端 HTTP 客户端
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    /// HTTP客户端
    client: Client,
    /// API 基础地址（不带结尾斜杠）
    api_base: String,
}

impl HttpRemoteClient {
    /// 创建新的远端客户端
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", config.resolve_api_key());
        let mut auth_value =
            HeaderValue::from_str(&bearer).context("API key contains invalid characters")?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(
            API_VERSION_HEADER,
            HeaderValue::from_str(&config.api_version)
                .context("API version contains invalid characters")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        info!("初始化远端客户端成功, api_base={}", config.api_base);

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// 检查响应状态，非 2xx 统一转换为分类错误
    async fn check_status(response: reqwest::Response) -> Result<Value, UploadError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::from_status(status.as_u16(), &body));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| UploadError::Network(format!("解析响应失败: {}", e)))
    }

    /// 从响应中取字符串字段，缺失视为远端拒绝（响应不合法）
    fn required_str(value: &Value, field: &str) -> Result<String, UploadError> {
        value
            .get(field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                UploadError::RemoteRejected(format!("响应缺少 {} 字段", field))
            })
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteClient {
    async fn create_upload_session(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> Result<UploadSession, UploadError> {
        debug!("创建上传会话: {} ({} bytes)", filename, size);
        let response = self
            .client
            .post(format!("{}/file_uploads", self.api_base))
            .json(&json!({
                "name": filename,
                "content_type": content_type,
                "size": size,
            }))
            .send()
            .await?;

        let body = Self::check_status(response).await?;
        let id = Self::required_str(&body, "id")?;
        // 远端可能不回上传地址，回退到约定的 send 端点
        let upload_url = body
            .get("upload_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{}/file_uploads/{}/send", self.api_base, id));

        Ok(UploadSession { id, upload_url })
    }

    async fn send_chunk(
        &self,
        session: &UploadSession,
        index: usize,
        data: Vec<u8>,
    ) -> Result<(), UploadError> {
        let part = multipart::Part::bytes(data).file_name("chunk");
        let form = multipart::Form::new()
            .text("part_number", index.to_string())
            .part("file", part);

        let response = self
            .client
            .post(&session.upload_url)
            .multipart(form)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn complete_session(&self, session: &UploadSession) -> Result<String, UploadError> {
        let response = self
            .client
            .post(format!(
                "{}/file_uploads/{}/complete",
                self.api_base, session.id
            ))
            .json(&json!({}))
            .send()
            .await?;

        let body = Self::check_status(response).await?;
        Self::required_str(&body, "id")
    }

    async fn create_external_import(
        &self,
        url: &str,
        filename: &str,
    ) -> Result<ImportTicket, UploadError> {
        info!("创建外链导入: {} -> {}", url, filename);
        let response = self
            .client
            .post(format!("{}/file_uploads", self.api_base))
            .json(&json!({
                "mode": "external_url",
                "filename": filename,
                "external_url": url,
            }))
            .send()
            .await?;

        let body = Self::check_status(response).await?;
        let id = Self::required_str(&body, "id")?;
        let status = body
            .get("status")
            .and_then(|v| v.as_str())
            .map(ImportStatus::from_str_lossy)
            .unwrap_or_default();

        Ok(ImportTicket { id, status })
    }

    async fn poll_import(&self, ticket_id: &str) -> Result<ImportPoll, UploadError> {
        let response = self
            .client
            .get(format!("{}/file_uploads/{}", self.api_base, ticket_id))
            .send()
            .await?;

        let body = Self::check_status(response).await?;
        let status = body
            .get("status")
            .and_then(|v| v.as_str())
            .map(ImportStatus::from_str_lossy)
            .unwrap_or_default();

        Ok(ImportPoll {
            status,
            content_length: body.get("content_length").and_then(|v| v.as_u64()),
            content_type: body
                .get("content_type")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }
}
