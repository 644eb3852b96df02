//! 摄像头健康检查：周期探测可达性，回报 `CameraStatus`。

use crate::reporter::CompletionReporter;
use bridge_device::DeviceControl;
use bridge_rpc::RpcClient;
use bridge_telemetry::{DeviceLog, EventBus};
use domain::keys;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const CAMERA_ONLINE: &str = "online(在线)";
pub const CAMERA_OFFLINE: &str = "offline(离线)";

pub struct HealthCheck {
    device_id: String,
    device: Arc<dyn DeviceControl>,
    rpc: Arc<dyn RpcClient>,
    reporter: CompletionReporter,
    bus: EventBus,
    probe_timeout: Duration,
    rpc_timeout: Duration,
    last_online: Option<bool>,
}

impl HealthCheck {
    pub fn new(
        device_id: impl Into<String>,
        device: Arc<dyn DeviceControl>,
        rpc: Arc<dyn RpcClient>,
        reporter: CompletionReporter,
        bus: EventBus,
        probe_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device,
            rpc,
            reporter,
            bus,
            probe_timeout,
            rpc_timeout,
            last_online: None,
        }
    }

    /// 探测一次并回报。设备日志只在状态变化时写入。
    pub async fn check_once(&mut self) -> bool {
        let online = match tokio::time::timeout(self.probe_timeout, self.device.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(target: "bridge.control", device_id = %self.device_id, error = %err, "camera_probe_failed");
                false
            }
            Err(_) => {
                warn!(target: "bridge.control", device_id = %self.device_id, "camera_probe_timeout");
                false
            }
        };
        let status = if online { CAMERA_ONLINE } else { CAMERA_OFFLINE };
        self.reporter
            .deliver(keys::CAMERA_STATUS, status.into())
            .await;

        if self.last_online != Some(online) {
            info!(target: "bridge.control", device_id = %self.device_id, status = %status, "camera_status_changed");
            self.device_log(online).await;
            self.last_online = Some(online);
        }
        online
    }

    async fn device_log(&self, online: bool) {
        let resolved =
            tokio::time::timeout(self.rpc_timeout, self.rpc.resolve_device(&self.device_id, true))
                .await;
        let identity = match resolved {
            Ok(Ok(identity)) => identity,
            Ok(Err(err)) => {
                warn!(target: "bridge.control", device_id = %self.device_id, error = %err, "device_resolve_failed");
                return;
            }
            Err(_) => {
                warn!(target: "bridge.control", device_id = %self.device_id, "device_resolve_timeout");
                return;
            }
        };
        let log = DeviceLog::new(
            self.bus.clone(),
            identity.tenant_id,
            identity.project_id,
            identity.device_id,
        );
        if online {
            log.online("摄像头在线");
        } else {
            log.offline("摄像头离线");
        }
    }

    /// 按固定周期运行，首次探测在启动后立即执行。
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_once().await;
            }
        })
    }
}
