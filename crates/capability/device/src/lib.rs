//! 设备侧协作方：摄像头控制（ONVIF）、快照归档与文件上传。

mod onvif;
mod snapshot;
mod soap;
mod upload;

pub use onvif::{OnvifCamera, OnvifConfig};
pub use snapshot::SnapshotArchive;
pub use upload::{FileUploader, HttpFileUploader, UploadError};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use domain::{MoveVector, PresetToken};

/// 设备调用错误。
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device transport error: {0}")]
    Transport(String),
    #[error("device http status {0}")]
    Status(u16),
    #[error("soap fault {code}: {reason}")]
    Fault { code: String, reason: String },
    #[error("unexpected device response: {0}")]
    Parse(String),
    #[error("device service not supported: {0}")]
    Unsupported(String),
    #[error("device call timed out: {0}")]
    Timeout(String),
    #[error("io error: {0}")]
    Io(String),
}

/// 媒体配置（取第一个 profile）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub token: String,
    pub name: String,
}

/// 已存储的预置位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub token: String,
    pub name: String,
}

/// 设备时间设置方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeMode {
    Manual,
    Ntp,
}

impl DateTimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateTimeMode::Manual => "Manual",
            DateTimeMode::Ntp => "NTP",
        }
    }
}

/// 时间校准参数。
#[derive(Debug, Clone, PartialEq)]
pub struct DateTimeSetting {
    pub mode: DateTimeMode,
    pub daylight_savings: bool,
    /// POSIX TZ，如 `CST-0`
    pub time_zone: String,
    pub time: NaiveDateTime,
}

/// 摄像头控制面。每次调用都是独立的请求/响应，可并发使用。
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn get_profiles(&self) -> Result<Profile, DeviceError>;

    /// 相对移动；`angle` 为 90° 单位下的比例。
    async fn relative_move(
        &self,
        vector: MoveVector,
        angle: f64,
        profile_token: &str,
    ) -> Result<(), DeviceError>;

    async fn get_snapshot_uri(&self, profile_token: &str) -> Result<String, DeviceError>;

    /// 下载快照图片。
    async fn fetch_snapshot(&self, uri: &str) -> Result<Vec<u8>, DeviceError>;

    /// 返回设备确认的预置位 token。
    async fn set_preset(
        &self,
        profile_token: &str,
        preset: &PresetToken,
    ) -> Result<String, DeviceError>;

    async fn get_presets(&self, profile_token: &str) -> Result<Vec<Preset>, DeviceError>;

    async fn goto_preset(
        &self,
        profile_token: &str,
        preset: &PresetToken,
    ) -> Result<(), DeviceError>;

    async fn remove_preset(
        &self,
        profile_token: &str,
        preset: &PresetToken,
    ) -> Result<(), DeviceError>;

    async fn set_home_position(&self, profile_token: &str) -> Result<(), DeviceError>;

    async fn goto_home_position(&self, profile_token: &str) -> Result<(), DeviceError>;

    async fn set_system_date_and_time(&self, setting: &DateTimeSetting) -> Result<(), DeviceError>;

    /// 可达性探测（健康检查使用）。
    async fn probe(&self) -> Result<(), DeviceError>;
}
