//! 设备日志：按租户/项目/设备归档到 `device` 索引。

use crate::bus::EventBus;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

/// 设备日志索引名。
pub const DEVICE_LOG_INDEX: &str = "device";

/// 设备日志类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Error,
    Active,
    UpLink,
    DownLink,
    Online,
    Offline,
    UpgradeUp,
    UpgradeDown,
    Attack,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Error => "error",
            LogKind::Active => "active",
            LogKind::UpLink => "upLink",
            LogKind::DownLink => "downLink",
            LogKind::Online => "online",
            LogKind::Offline => "offline",
            LogKind::UpgradeUp => "upgradeUp",
            LogKind::UpgradeDown => "upgradeDown",
            LogKind::Attack => "attack",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 设备日志写入器。附加字段以 JSON 追加到消息末尾。
#[derive(Clone)]
pub struct DeviceLog {
    bus: EventBus,
    tenant_id: i32,
    project_id: i32,
    device_id: String,
    data: Map<String, Value>,
}

impl DeviceLog {
    pub fn new(bus: EventBus, tenant_id: i32, project_id: i32, device_id: impl Into<String>) -> Self {
        Self {
            bus,
            tenant_id,
            project_id,
            device_id: device_id.into(),
            data: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.echo(LogKind::Error, message);
    }

    pub fn active(&self, message: impl fmt::Display) {
        self.echo(LogKind::Active, message);
    }

    pub fn up_link(&self, message: impl fmt::Display) {
        self.echo(LogKind::UpLink, message);
    }

    pub fn down_link(&self, message: impl fmt::Display) {
        self.echo(LogKind::DownLink, message);
    }

    pub fn online(&self, message: impl fmt::Display) {
        self.echo(LogKind::Online, message);
    }

    pub fn offline(&self, message: impl fmt::Display) {
        self.echo(LogKind::Offline, message);
    }

    pub fn upgrade_up(&self, message: impl fmt::Display) {
        self.echo(LogKind::UpgradeUp, message);
    }

    pub fn upgrade_down(&self, message: impl fmt::Display) {
        self.echo(LogKind::UpgradeDown, message);
    }

    pub fn attack(&self, message: impl fmt::Display) {
        self.echo(LogKind::Attack, message);
    }

    fn echo(&self, kind: LogKind, message: impl fmt::Display) {
        let mut message = message.to_string();
        if !self.data.is_empty() {
            let data = serde_json::to_string(&self.data).unwrap_or_default();
            message = format!("{}\t\t{}", message, data);
        }
        if kind == LogKind::Error {
            // 日志面板按 HTML 渲染
            message = format!(r#"<span style="color:red;">{}</span>"#, message);
        }

        let mut fields = Map::new();
        fields.insert("tid".to_string(), Value::from(self.tenant_id));
        fields.insert("pid".to_string(), Value::from(self.project_id));
        fields.insert("did".to_string(), Value::from(self.device_id.clone()));
        fields.insert("type".to_string(), Value::from(kind.as_str()));
        fields.insert("message".to_string(), Value::from(message.clone()));
        if let Err(err) = self.bus.emit(fields, DEVICE_LOG_INDEX) {
            warn!(target: "bridge.telemetry", device_id = %self.device_id, error = %err, "device_log_dropped");
        }

        debug!(
            target: "bridge.telemetry",
            tid = self.tenant_id,
            pid = self.project_id,
            did = %self.device_id,
            kind = %kind,
            "{}",
            message
        );
    }
}
