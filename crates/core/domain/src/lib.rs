pub mod command;
pub mod data;
pub mod twins;

pub use command::{
    CommandState, DecodeError, DesiredCommand, MoveVector, PresetToken, decode_desired,
};
pub use data::{AckPacket, DeviceIdentity, DevicePayload};
pub use twins::{Content, Meta, Metadata, Payload, RequestTwins, ResponseTwins, State, TwinMethod};

/// 影子状态中的命令键。
pub mod keys {
    /// 云台控制
    pub const PTZ_CONTROL: &str = "PTZControl";
    /// 转动角度
    pub const ANGLE: &str = "Angle";
    /// 放大缩小
    pub const ZOOM: &str = "Zoom";
    /// 快照
    pub const SNAPSHOT: &str = "Snapshot";
    /// 快照路径（异步回报）
    pub const SNAPSHOT_URL: &str = "SnapshotURL";
    /// 设置预置位置
    pub const SET_PRESET: &str = "SetPreset";
    /// 获取所有预置位置
    pub const GET_PRESETS: &str = "GetPresets";
    /// 转到预置位置
    pub const GOTO_PRESET: &str = "GotoPreset";
    /// 移除预置位置
    pub const REMOVE_PRESET: &str = "RemovePreset";
    /// 设置 Home 位
    pub const SET_HOME_POSITION: &str = "SetHomePosition";
    /// 转到 Home 位
    pub const GOTO_HOME_POSITION: &str = "GotoHomePosition";
    /// 时间校准
    pub const TIME_CALIBRATION: &str = "TimeCalibration";
    /// 时间校准值（异步回报）
    pub const TIME_CALIBRATION_DATA: &str = "TimeCalibrationData";
    /// 设备在线状态（健康检查回报）
    pub const CAMERA_STATUS: &str = "CameraStatus";
}
