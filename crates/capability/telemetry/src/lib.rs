//! 追踪初始化、进程计数器与遥测事件总线。

mod bus;
mod device_log;
mod sink;

pub use bus::{BusError, Event, EventBus, EventBusWorker, EventPool};
pub use device_log::{DEVICE_LOG_INDEX, DeviceLog, LogKind};
pub use sink::{ElasticsearchSink, EventSink, NoopSink, SinkError};

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 桥接运行事件索引（队列满、回报失败等）。
pub const BRIDGE_EVENT_INDEX: &str = "bridge";

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub inbound_messages: u64,
    pub rejected_topics: u64,
    pub ingress_dropped: u64,
    pub commands_received: u64,
    pub commands_succeeded: u64,
    pub commands_failed: u64,
    pub decode_failures: u64,
    pub resolve_failures: u64,
    pub reports_published: u64,
    pub reports_failed: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub sink_write_failures: u64,
    pub reconnects: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    inbound_messages: AtomicU64,
    rejected_topics: AtomicU64,
    ingress_dropped: AtomicU64,
    commands_received: AtomicU64,
    commands_succeeded: AtomicU64,
    commands_failed: AtomicU64,
    decode_failures: AtomicU64,
    resolve_failures: AtomicU64,
    reports_published: AtomicU64,
    reports_failed: AtomicU64,
    events_emitted: AtomicU64,
    events_dropped: AtomicU64,
    sink_write_failures: AtomicU64,
    reconnects: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            inbound_messages: AtomicU64::new(0),
            rejected_topics: AtomicU64::new(0),
            ingress_dropped: AtomicU64::new(0),
            commands_received: AtomicU64::new(0),
            commands_succeeded: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            resolve_failures: AtomicU64::new(0),
            reports_published: AtomicU64::new(0),
            reports_failed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            sink_write_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inbound_messages: self.inbound_messages.load(Ordering::Relaxed),
            rejected_topics: self.rejected_topics.load(Ordering::Relaxed),
            ingress_dropped: self.ingress_dropped.load(Ordering::Relaxed),
            commands_received: self.commands_received.load(Ordering::Relaxed),
            commands_succeeded: self.commands_succeeded.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            reports_published: self.reports_published.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            sink_write_failures: self.sink_write_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录入站消息次数。
pub fn record_inbound_message() {
    metrics().inbound_messages.fetch_add(1, Ordering::Relaxed);
}

/// 记录 topic 形状不合法被拒绝的次数。
pub fn record_rejected_topic() {
    metrics().rejected_topics.fetch_add(1, Ordering::Relaxed);
}

/// 记录入站队列满导致的丢弃次数。
pub fn record_ingress_dropped() {
    metrics().ingress_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录进入分发的命令数。
pub fn record_command_received() {
    metrics().commands_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录终态为 SUCCESS 的命令数。
pub fn record_command_succeeded() {
    metrics().commands_succeeded.fetch_add(1, Ordering::Relaxed);
}

/// 记录终态为 FAILED 的命令数。
pub fn record_command_failed() {
    metrics().commands_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录报文解码失败次数。
pub fn record_decode_failure() {
    metrics().decode_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录设备身份解析失败次数。
pub fn record_resolve_failure() {
    metrics().resolve_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录 reported 发布成功次数。
pub fn record_report_published() {
    metrics().reports_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录 reported 发布失败次数。
pub fn record_report_failed() {
    metrics().reports_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录进入事件总线的事件数。
pub fn record_event_emitted() {
    metrics().events_emitted.fetch_add(1, Ordering::Relaxed);
}

/// 记录事件总线丢弃的事件数。
pub fn record_event_dropped() {
    metrics().events_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录 sink 写入失败次数。
pub fn record_sink_write_failure() {
    metrics()
        .sink_write_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录 MQTT 重连次数。
pub fn record_reconnect() {
    metrics().reconnects.fetch_add(1, Ordering::Relaxed);
}
