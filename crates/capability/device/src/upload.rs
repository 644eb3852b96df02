//! 快照上传到文件服务。

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("io error: {0}")]
    Io(String),
    #[error("upload http error: {0}")]
    Http(String),
    #[error("invalid upload response: {0}")]
    Decode(String),
}

/// 文件上传。返回文件服务分配的 fid，未分配时返回 `None`。
#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<Option<String>, UploadError>;
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    /// 文件服务可能返回字符串或数字
    #[serde(default)]
    code: serde_json::Value,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    result: UploadResult,
}

#[derive(Debug, Default, Deserialize)]
struct UploadResult {
    #[serde(default)]
    fid: String,
}

/// multipart 表单上传（字段名 `file`）。
#[derive(Debug, Clone)]
pub struct HttpFileUploader {
    client: reqwest::Client,
    url: Option<String>,
}

impl HttpFileUploader {
    /// `url` 为空时上传为空操作。
    pub fn new(url: Option<String>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|err| UploadError::Http(err.to_string()))?;
        Ok(Self {
            client,
            url: url.filter(|url| !url.trim().is_empty()),
        })
    }
}

#[async_trait]
impl FileUploader for HttpFileUploader {
    async fn upload(&self, path: &Path) -> Result<Option<String>, UploadError> {
        let Some(url) = &self.url else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| UploadError::Io(err.to_string()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.png".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|err| UploadError::Http(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|err| UploadError::Http(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Http(format!("status {}", status.as_u16())));
        }
        let body = response
            .text()
            .await
            .map_err(|err| UploadError::Http(err.to_string()))?;
        let parsed = parse_response(&body)?;
        if parsed.result.fid.is_empty() {
            warn!(
                target: "bridge.device",
                code = %parsed.code,
                msg = %parsed.msg,
                "upload_without_fid"
            );
            return Ok(None);
        }
        Ok(Some(parsed.result.fid))
    }
}

fn parse_response(body: &str) -> Result<UploadResponse, UploadError> {
    serde_json::from_str(body).map_err(|err| UploadError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_code_may_be_string_or_number() {
        let parsed = parse_response(r#"{"code":"0","msg":"ok","result":{"fid":"3,01637037d6"}}"#)
            .unwrap();
        assert_eq!(parsed.result.fid, "3,01637037d6");
        let parsed = parse_response(r#"{"code":500,"msg":"full"}"#).unwrap();
        assert_eq!(parsed.code, serde_json::json!(500));
        assert!(parsed.result.fid.is_empty());
    }

    #[test]
    fn invalid_json_is_decode_error() {
        assert!(matches!(
            parse_response("<html>"),
            Err(UploadError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn missing_url_is_noop() {
        let uploader = HttpFileUploader::new(Some("  ".to_string())).unwrap();
        let outcome = uploader
            .upload(Path::new("/nonexistent/20240101000000.png"))
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
