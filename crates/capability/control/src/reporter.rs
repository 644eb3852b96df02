//! 异步结果回报：把命令产生的结果写回影子 reported 状态。
//!
//! 回报只发布一次，没有确认也不重试。失败时记录日志与计数，并向事件总线投递一条事件。

use crate::ReportError;
use bridge_ingest::Publisher;
use bridge_telemetry::{BRIDGE_EVENT_INDEX, EventBus, record_report_failed, record_report_published};
use domain::RequestTwins;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub struct CompletionReporter {
    publisher: Arc<dyn Publisher>,
    topic: String,
    bus: EventBus,
}

impl CompletionReporter {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>, bus: EventBus) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            bus,
        }
    }

    /// 单字段 reported 更新。
    pub async fn report(&self, key: &str, value: Value) -> Result<(), ReportError> {
        let payload = RequestTwins::reported_update(key, value)
            .to_json()
            .map_err(|err| ReportError::Encode(err.to_string()))?;
        self.publisher.publish(&self.topic, payload).await?;
        Ok(())
    }

    /// 回报并就地处理失败。
    pub async fn deliver(&self, key: &str, value: Value) {
        match self.report(key, value).await {
            Ok(()) => {
                record_report_published();
                info!(target: "bridge.control", topic = %self.topic, key = %key, "report_published");
            }
            Err(err) => {
                record_report_failed();
                warn!(
                    target: "bridge.control",
                    topic = %self.topic,
                    key = %key,
                    error = %err,
                    "report_failed"
                );
                let mut fields = Map::new();
                fields.insert("event".to_string(), Value::from("report_failed"));
                fields.insert("topic".to_string(), Value::from(self.topic.clone()));
                fields.insert("key".to_string(), Value::from(key));
                fields.insert("error".to_string(), Value::from(err.to_string()));
                self.bus.emit_or_log(fields, BRIDGE_EVENT_INDEX);
            }
        }
    }

    /// 在独立任务中回报，调用方无需等待。
    pub fn spawn(&self, key: impl Into<String>, value: impl Into<Value>) -> JoinHandle<()> {
        let reporter = self.clone();
        let key = key.into();
        let value = value.into();
        tokio::spawn(async move {
            reporter.deliver(&key, value).await;
        })
    }
}
