//! 遥测事件总线。
//!
//! 生产者通过 `EventBus::emit` 非阻塞投递事件；单个消费者按 FIFO 顺序写入 sink。
//! 总线满时事件直接丢弃，遥测永远不对业务路径产生背压。

use crate::sink::EventSink;
use crate::{record_event_dropped, record_event_emitted, record_sink_write_failure};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 事件池保留的最大空闲事件数。
const POOL_SIZE: usize = 256;

/// 事件总线错误。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("event bus is full")]
    Full,
    #[error("event bus is closed")]
    Closed,
}

/// 单条遥测记录。
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub index: String,
    pub fields: Map<String, Value>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            index: String::new(),
            fields: Map::new(),
        }
    }
}

impl Event {
    /// 写入 sink 的文档：`{"index": .., "value": {..fields, "timestamp": ..}}`。
    pub fn document(&self) -> Value {
        let mut value = self.fields.clone();
        value.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339()),
        );
        let mut document = Map::new();
        document.insert("index".to_string(), Value::String(self.index.clone()));
        document.insert("value".to_string(), Value::Object(value));
        Value::Object(document)
    }

    fn reset(&mut self) {
        self.timestamp = DateTime::<Utc>::UNIX_EPOCH;
        self.index.clear();
        self.fields.clear();
    }
}

/// 预分配的事件对象池。归还时清空字段，避免事件之间串数据。
#[derive(Debug)]
pub struct EventPool {
    free: Mutex<Vec<Box<Event>>>,
    limit: usize,
}

impl EventPool {
    pub fn new(size: usize) -> Self {
        let free = (0..size).map(|_| Box::new(Event::default())).collect();
        Self {
            free: Mutex::new(free),
            limit: size,
        }
    }

    pub fn acquire(&self) -> Box<Event> {
        let mut free = self.free.lock().unwrap_or_else(|err| err.into_inner());
        free.pop().unwrap_or_default()
    }

    pub fn release(&self, mut event: Box<Event>) {
        event.reset();
        let mut free = self.free.lock().unwrap_or_else(|err| err.into_inner());
        if free.len() < self.limit {
            free.push(event);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|err| err.into_inner()).len()
    }
}

/// 事件总线生产端（可克隆，进程内共享）。
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<Box<Event>>,
    pool: Arc<EventPool>,
}

/// 事件总线消费端任务句柄。
pub struct EventBusWorker {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl EventBus {
    /// 创建总线并启动唯一的消费者任务。
    pub fn spawn(capacity: usize, sink: Arc<dyn EventSink>) -> (Self, EventBusWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pool = Arc::new(EventPool::new(capacity.clamp(1, POOL_SIZE)));
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(consume(receiver, stop_rx, sink, pool.clone()));
        (
            Self { sender, pool },
            EventBusWorker {
                stop: Some(stop_tx),
                handle,
            },
        )
    }

    /// 非阻塞投递事件；总线满或已关闭时事件被丢弃。
    pub fn emit(&self, fields: Map<String, Value>, index: &str) -> Result<(), BusError> {
        let mut event = self.pool.acquire();
        event.timestamp = Utc::now();
        event.index.push_str(index);
        event.fields = fields;
        match self.sender.try_send(event) {
            Ok(()) => {
                record_event_emitted();
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.pool.release(event);
                record_event_dropped();
                Err(BusError::Full)
            }
            Err(TrySendError::Closed(event)) => {
                self.pool.release(event);
                record_event_dropped();
                Err(BusError::Closed)
            }
        }
    }

    /// 投递失败只记日志，供不关心结果的调用方使用。
    pub fn emit_or_log(&self, fields: Map<String, Value>, index: &str) {
        if let Err(err) = self.emit(fields, index) {
            warn!(target: "bridge.telemetry", index = %index, error = %err, "event_emit_failed");
        }
    }

    pub fn pool(&self) -> &EventPool {
        &self.pool
    }
}

impl EventBusWorker {
    /// 停止接收新事件，并在 `wait` 内写完已缓冲的事件。返回是否按时排空。
    pub async fn shutdown(mut self, wait: Duration) -> bool {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match tokio::time::timeout(wait, &mut self.handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(target: "bridge.telemetry", wait_ms = wait.as_millis() as u64, "event_bus_drain_timeout");
                self.handle.abort();
                false
            }
        }
    }
}

async fn consume(
    mut receiver: mpsc::Receiver<Box<Event>>,
    mut stop: oneshot::Receiver<()>,
    sink: Arc<dyn EventSink>,
    pool: Arc<EventPool>,
) {
    loop {
        tokio::select! {
            biased;
            event = receiver.recv() => match event {
                Some(event) => write_one(sink.as_ref(), &pool, event).await,
                None => break,
            },
            _ = &mut stop => {
                receiver.close();
                while let Some(event) = receiver.recv().await {
                    write_one(sink.as_ref(), &pool, event).await;
                }
                break;
            }
        }
    }
    debug!(target: "bridge.telemetry", "event_bus_stopped");
}

async fn write_one(sink: &dyn EventSink, pool: &EventPool, event: Box<Event>) {
    if let Err(err) = sink.write(&event).await {
        record_sink_write_failure();
        warn!(
            target: "bridge.telemetry",
            index = %event.index,
            error = %err,
            "event_sink_write_failed"
        );
    }
    pool.release(event);
}
