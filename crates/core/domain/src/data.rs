use serde::{Deserialize, Serialize};

/// 入站原始报文：topic 中解析出的设备 ID 与原始负载。
#[derive(Debug, Clone)]
pub struct DevicePayload {
    pub device_id: String,
    pub payload: Vec<u8>,
    /// 进入入站队列的时刻（Unix 毫秒）
    pub received_at_ms: i64,
}

impl DevicePayload {
    pub fn new(device_id: impl Into<String>, payload: Vec<u8>, received_at_ms: i64) -> Self {
        Self {
            device_id: device_id.into(),
            payload,
            received_at_ms,
        }
    }

    /// 从入队到 `now_ms` 的等待时长；时钟回拨时记为 0。
    pub fn queue_delay_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.received_at_ms).max(0)
    }
}

/// 设备身份：由 RPC 解析得到的租户/项目/设备标识。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub tenant_id: i32,
    pub project_id: i32,
    pub device_id: String,
}

impl DeviceIdentity {
    pub fn new(tenant_id: i32, project_id: i32, device_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            project_id,
            device_id: device_id.into(),
        }
    }
}

/// 命令执行回执（预留给上行通道，不是权威状态）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPacket {
    pub command_id: String,
    pub status: String,
    pub result: String,
}
