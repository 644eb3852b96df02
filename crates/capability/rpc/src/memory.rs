use crate::{RpcClient, RpcError};
use async_trait::async_trait;
use domain::{CommandState, DeviceIdentity};
use std::collections::HashMap;
use std::sync::Mutex;

/// 进程内 RPC 实现：固定的设备身份表，记录每次身份解析与状态回写。
#[derive(Debug, Default)]
pub struct StaticRpcClient {
    devices: Mutex<HashMap<String, DeviceIdentity>>,
    states: Mutex<Vec<(String, CommandState)>>,
    resolutions: Mutex<Vec<(String, bool)>>,
}

impl StaticRpcClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, identity: DeviceIdentity) -> Self {
        self.insert_device(identity);
        self
    }

    pub fn insert_device(&self, identity: DeviceIdentity) {
        let mut devices = self.devices.lock().unwrap_or_else(|err| err.into_inner());
        devices.insert(identity.device_id.clone(), identity);
    }

    /// 已回写的 `(command_id, state)`，按调用顺序。
    pub fn states(&self) -> Vec<(String, CommandState)> {
        self.states
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// 已解析的 `(device_id, allow_offline)`，按调用顺序。
    pub fn resolutions(&self) -> Vec<(String, bool)> {
        self.resolutions
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

#[async_trait]
impl RpcClient for StaticRpcClient {
    async fn resolve_device(
        &self,
        device_id: &str,
        allow_offline: bool,
    ) -> Result<DeviceIdentity, RpcError> {
        self.resolutions
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push((device_id.to_string(), allow_offline));
        let devices = self.devices.lock().unwrap_or_else(|err| err.into_inner());
        devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| RpcError::NotFound(device_id.to_string()))
    }

    async fn update_command_state(
        &self,
        command_id: &str,
        state: CommandState,
    ) -> Result<(), RpcError> {
        let mut states = self.states.lock().unwrap_or_else(|err| err.into_inner());
        states.push((command_id.to_string(), state));
        Ok(())
    }
}
