//! 命令分发器：把一条入站影子报文转换为摄像头操作与命令状态回写。
//!
//! 处理顺序：解析设备身份 → 解码 desired → ACK → 逐条执行 → SUCCESS/FAILED。
//! 单条报文内任一操作失败，整条命令记为 FAILED。

use crate::{DispatchError, ReportError, SNAPSHOT_UPLOAD_FAILED, reporter::CompletionReporter};
use bridge_device::{
    DateTimeMode, DateTimeSetting, DeviceControl, DeviceError, FileUploader, SnapshotArchive,
};
use bridge_ingest::IngressReceiver;
use bridge_rpc::{RpcClient, RpcError};
use bridge_telemetry::{
    DeviceLog, EventBus, record_command_failed, record_command_received, record_command_succeeded,
    record_decode_failure, record_resolve_failure,
};
use chrono::{Local, Utc};
use domain::{
    CommandState, DesiredCommand, DeviceIdentity, DevicePayload, MoveVector, PresetToken,
    ResponseTwins, decode_desired, keys,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 分发参数。
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// RPC 调用超时
    pub rpc_timeout: Duration,
    /// 单个设备操作的超时
    pub device_call_timeout: Duration,
    /// 时间校准下发的 POSIX 时区
    pub time_zone: String,
}

/// 一条报文的处理结果。
#[derive(Debug, Default)]
pub struct Dispatched {
    pub command_id: String,
    /// 回写的终态；没有 command_id 时为 `None`
    pub state: Option<CommandState>,
    /// 本次触发的异步回报任务
    pub completions: Vec<JoinHandle<()>>,
}

/// 命令分发器。
#[derive(Clone)]
pub struct CommandDispatcher {
    rpc: Arc<dyn RpcClient>,
    device: Arc<dyn DeviceControl>,
    archive: SnapshotArchive,
    uploader: Arc<dyn FileUploader>,
    reporter: CompletionReporter,
    bus: EventBus,
    settings: DispatcherSettings,
}

impl CommandDispatcher {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        device: Arc<dyn DeviceControl>,
        archive: SnapshotArchive,
        uploader: Arc<dyn FileUploader>,
        reporter: CompletionReporter,
        bus: EventBus,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            rpc,
            device,
            archive,
            uploader,
            reporter,
            bus,
            settings,
        }
    }

    pub async fn handle(&self, payload: DevicePayload) -> Result<Dispatched, DispatchError> {
        let identity = match self.resolve(&payload.device_id).await {
            Ok(identity) => identity,
            Err(err) => {
                record_resolve_failure();
                warn!(
                    target: "bridge.control",
                    device_id = %payload.device_id,
                    error = %err,
                    "device_resolve_failed"
                );
                return Err(err.into());
            }
        };
        let log = DeviceLog::new(
            self.bus.clone(),
            identity.tenant_id,
            identity.project_id,
            identity.device_id.clone(),
        );

        let (twins, commands) = match decode(&payload.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                record_decode_failure();
                warn!(
                    target: "bridge.control",
                    device_id = %identity.device_id,
                    error = %err,
                    "payload_decode_failed"
                );
                log.error(format!("命令解析失败: {}", err));
                return Err(err);
            }
        };
        record_command_received();
        info!(
            target: "bridge.control",
            device_id = %identity.device_id,
            command_id = %twins.command_id,
            commands = commands.len(),
            "command_received"
        );
        log.clone()
            .with_field("command_id", twins.command_id.clone())
            .down_link(serde_json::Value::Object(twins.desired().clone()));

        if twins.has_command_id() {
            if let Err(err) = self.update_state(&twins.command_id, CommandState::Ack).await {
                warn!(
                    target: "bridge.control",
                    command_id = %twins.command_id,
                    error = %err,
                    "command_ack_failed"
                );
            }
        }

        let mut outcome = Dispatched {
            command_id: twins.command_id.clone(),
            ..Dispatched::default()
        };
        let mut failed = false;
        for command in &commands {
            match self.execute(command).await {
                Ok(completion) => outcome.completions.extend(completion),
                Err(err) => {
                    failed = true;
                    warn!(
                        target: "bridge.control",
                        device_id = %identity.device_id,
                        command_id = %twins.command_id,
                        key = %command.key(),
                        error = %err,
                        "command_execution_failed"
                    );
                    log.error(format!("{} 执行失败: {}", command.key(), err));
                }
            }
        }

        let state = if failed {
            record_command_failed();
            CommandState::Failed
        } else {
            record_command_succeeded();
            CommandState::Success
        };
        info!(
            target: "bridge.control",
            device_id = %identity.device_id,
            command_id = %twins.command_id,
            state = %state,
            "command_finished"
        );
        if !twins.has_command_id() {
            return Ok(outcome);
        }
        self.update_state(&twins.command_id, state).await?;
        outcome.state = Some(state);
        Ok(outcome)
    }

    async fn resolve(&self, device_id: &str) -> Result<DeviceIdentity, RpcError> {
        tokio::time::timeout(
            self.settings.rpc_timeout,
            self.rpc.resolve_device(device_id, true),
        )
        .await
        .map_err(|_| RpcError::Unavailable(format!("resolve {} timed out", device_id)))?
    }

    async fn update_state(&self, command_id: &str, state: CommandState) -> Result<(), ReportError> {
        tokio::time::timeout(
            self.settings.rpc_timeout,
            self.rpc.update_command_state(command_id, state),
        )
        .await
        .map_err(|_| RpcError::Unavailable(format!("update {} timed out", command_id)))??;
        debug!(target: "bridge.control", command_id = %command_id, state = %state, "command_state_updated");
        Ok(())
    }

    /// 执行单条命令，返回可能产生的异步回报任务。
    async fn execute(&self, command: &DesiredCommand) -> Result<Option<JoinHandle<()>>, DispatchError> {
        match command {
            DesiredCommand::PtzMove { vector, angle } => {
                self.relative_move(*vector, *angle).await?;
            }
            DesiredCommand::PtzHome | DesiredCommand::GotoHomePosition => {
                self.bounded("goto_home_position", async {
                    let profile = self.device.get_profiles().await?;
                    self.device.goto_home_position(&profile.token).await
                })
                .await?;
            }
            DesiredCommand::Snapshot => return self.snapshot().await.map(Some),
            DesiredCommand::SetPreset(preset) => {
                let token = self.set_preset(preset).await?;
                debug!(target: "bridge.control", preset = %token, "preset_stored");
            }
            DesiredCommand::GetPresets => {
                let presets = self
                    .bounded("get_presets", async {
                        let profile = self.device.get_profiles().await?;
                        self.device.get_presets(&profile.token).await
                    })
                    .await?;
                let tokens: Vec<&str> = presets.iter().map(|preset| preset.token.as_str()).collect();
                info!(
                    target: "bridge.control",
                    count = presets.len(),
                    presets = ?tokens,
                    "presets_listed"
                );
            }
            DesiredCommand::GotoPreset(preset) => {
                self.bounded("goto_preset", async {
                    let profile = self.device.get_profiles().await?;
                    self.device.goto_preset(&profile.token, preset).await
                })
                .await?;
            }
            DesiredCommand::RemovePreset(preset) => {
                self.bounded("remove_preset", async {
                    let profile = self.device.get_profiles().await?;
                    self.device.remove_preset(&profile.token, preset).await
                })
                .await?;
            }
            DesiredCommand::SetHomePosition => {
                self.bounded("set_home_position", async {
                    let profile = self.device.get_profiles().await?;
                    self.device.set_home_position(&profile.token).await
                })
                .await?;
            }
            DesiredCommand::TimeCalibration => return self.calibrate_time().await.map(Some),
            DesiredCommand::Unknown(key) => {
                debug!(target: "bridge.control", key = %key, "unknown_command_ignored");
            }
        }
        Ok(None)
    }

    async fn relative_move(&self, vector: MoveVector, angle: f64) -> Result<(), DispatchError> {
        self.bounded("relative_move", async {
            let profile = self.device.get_profiles().await?;
            self.device.relative_move(vector, angle, &profile.token).await
        })
        .await
    }

    async fn set_preset(&self, preset: &PresetToken) -> Result<String, DispatchError> {
        self.bounded("set_preset", async {
            let profile = self.device.get_profiles().await?;
            self.device.set_preset(&profile.token, preset).await
        })
        .await
    }

    /// 抓拍 → 落盘 → 上传 → 异步回报 `SnapshotURL`。
    async fn snapshot(&self) -> Result<JoinHandle<()>, DispatchError> {
        let bytes = self
            .bounded("snapshot", async {
                let profile = self.device.get_profiles().await?;
                let uri = self.device.get_snapshot_uri(&profile.token).await?;
                self.device.fetch_snapshot(&uri).await
            })
            .await?;
        let path = self
            .archive
            .save(&bytes, Local::now().naive_local())
            .await
            .map_err(|source| DispatchError::Execution {
                operation: "snapshot",
                source,
            })?;
        let url = match self.uploader.upload(&path).await {
            Ok(Some(fid)) => fid,
            Ok(None) => SNAPSHOT_UPLOAD_FAILED.to_string(),
            Err(err) => {
                warn!(
                    target: "bridge.control",
                    path = %path.display(),
                    error = %err,
                    "snapshot_upload_failed"
                );
                SNAPSHOT_UPLOAD_FAILED.to_string()
            }
        };
        Ok(self.reporter.spawn(keys::SNAPSHOT_URL, url))
    }

    /// 下发本地时间，并异步回报 `TimeCalibrationData`。
    async fn calibrate_time(&self) -> Result<JoinHandle<()>, DispatchError> {
        let setting = DateTimeSetting {
            mode: DateTimeMode::Manual,
            daylight_savings: false,
            time_zone: self.settings.time_zone.clone(),
            time: Local::now().naive_local(),
        };
        self.bounded("time_calibration", self.device.set_system_date_and_time(&setting))
            .await?;
        let applied = setting.time.format("%Y-%m-%d %H:%M:%S").to_string();
        Ok(self.reporter.spawn(keys::TIME_CALIBRATION_DATA, applied))
    }

    /// 给设备操作加上超时，并包装为执行错误。
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, DispatchError>
    where
        F: Future<Output = Result<T, DeviceError>>,
    {
        let timeout = self.settings.device_call_timeout;
        let source = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => DeviceError::Timeout(format!("{} exceeded {:?}", operation, timeout)),
        };
        Err(DispatchError::Execution { operation, source })
    }
}

fn decode(payload: &[u8]) -> Result<(ResponseTwins, Vec<DesiredCommand>), DispatchError> {
    let twins = ResponseTwins::from_slice(payload).map_err(domain::DecodeError::from)?;
    let commands = decode_desired(twins.desired())?;
    Ok((twins, commands))
}

/// 单消费者：按 FIFO 顺序处理入站队列，直到队列关闭且排空。
pub fn spawn_dispatch_worker(
    mut receiver: IngressReceiver,
    dispatcher: Arc<CommandDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = receiver.recv().await {
            let device_id = payload.device_id.clone();
            debug!(
                target: "bridge.control",
                device_id = %device_id,
                queued_ms = payload.queue_delay_ms(Utc::now().timestamp_millis()),
                "payload_dequeued"
            );
            if let Err(err) = dispatcher.handle(payload).await {
                debug!(
                    target: "bridge.control",
                    device_id = %device_id,
                    error = %err,
                    "payload_dispatch_aborted"
                );
            }
        }
        info!(target: "bridge.control", "dispatch_worker_stopped");
    })
}
