use crate::bus::Event;
use async_trait::async_trait;
use std::time::Duration;

/// 写入 sink 的超时。
const SINK_TIMEOUT: Duration = Duration::from_secs(5);

/// sink 写入错误。
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("sink rejected event: {0}")]
    Rejected(String),
}

/// 遥测事件落地抽象。
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: &Event) -> Result<(), SinkError>;
}

/// 空 sink（未配置检索存储时使用）。
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn write(&self, _event: &Event) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Elasticsearch sink：`POST {url}/{index}/_doc`。
#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: reqwest::Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchSink {
    pub fn new(
        url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(SINK_TIMEOUT)
            .build()
            .map_err(|err| SinkError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    fn endpoint(&self, index: &str) -> String {
        format!("{}/{}/_doc", self.url, index)
    }
}

#[async_trait]
impl EventSink for ElasticsearchSink {
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(self.endpoint(&event.index))
            .json(&event.document());
        if let Some(username) = self.username.as_deref() {
            request = request.basic_auth(username, self.password.as_deref());
        }
        let response = request
            .send()
            .await
            .map_err(|err| SinkError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_index_doc_path() {
        let sink = ElasticsearchSink::new("http://127.0.0.1:9200/", None, None).unwrap();
        assert_eq!(sink.endpoint("device"), "http://127.0.0.1:9200/device/_doc");
    }
}
