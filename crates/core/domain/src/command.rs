//! 命令状态与期望命令解码。
//!
//! desired 中的值是异构的（字符串、数字或缺省）。这里按键定义各自的取值形状，
//! 在解码阶段拒绝不符合形状的值，分发器只处理 `DesiredCommand`。

use crate::keys;
use serde_json::{Map, Value};
use std::fmt;

/// home 哨兵值：`PTZControl = "9"` 表示归位。
pub const HOME_SENTINEL: &str = "9";

/// 未给出可识别角度时的最小步长。
pub const DEFAULT_ANGLE: f64 = 0.015625;

/// 命令生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandState {
    Ack,
    Success,
    Failed,
    Timeout,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Ack => "ACK",
            CommandState::Success => "SUCCESS",
            CommandState::Failed => "FAILED",
            CommandState::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandState::Ack)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 相对移动方向：各轴取值 -1/0/1。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveVector {
    /// 正数上转，负数下转
    pub up_down: i8,
    /// 正数右转，负数左转
    pub left_right: i8,
    /// 正数拉近，负数拉远
    pub zoom: i8,
}

impl MoveVector {
    pub const fn new(up_down: i8, left_right: i8, zoom: i8) -> Self {
        Self {
            up_down,
            left_right,
            zoom,
        }
    }

    /// 八向选择器 `"1".."8"` 到方向向量，其余返回零向量。
    pub fn from_selector(selector: &str) -> Self {
        match selector {
            "1" => Self::new(0, -1, 0),  // 左
            "2" => Self::new(0, 1, 0),   // 右
            "3" => Self::new(1, 0, 0),   // 上
            "4" => Self::new(-1, 0, 0),  // 下
            "5" => Self::new(1, -1, 0),  // 左上
            "6" => Self::new(-1, -1, 0), // 左下
            "7" => Self::new(1, 1, 0),   // 右上
            "8" => Self::new(-1, 1, 0),  // 右下
            _ => Self::default(),
        }
    }
}

/// 预置位 token（数值以最短形式渲染，如 `3` 而不是 `3.0`）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresetToken(String);

impl PresetToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 预置位显示名称。
    pub fn display_name(&self) -> String {
        format!("预置点 {}", self.0)
    }

    fn from_number(value: f64) -> Option<Self> {
        if value.is_finite() {
            Some(Self(format!("{}", value)))
        } else {
            None
        }
    }
}

impl fmt::Display for PresetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 解码后的期望命令。
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredCommand {
    /// 相对移动；`angle` 为 90° 单位下的转动比例
    PtzMove { vector: MoveVector, angle: f64 },
    /// `PTZControl` 为 home 哨兵
    PtzHome,
    Snapshot,
    SetPreset(PresetToken),
    GetPresets,
    GotoPreset(PresetToken),
    RemovePreset(PresetToken),
    SetHomePosition,
    GotoHomePosition,
    TimeCalibration,
    /// 不在命令表中的键
    Unknown(String),
}

impl DesiredCommand {
    /// 命令对应的 desired 键（云台控制统一为 `PTZControl`）。
    pub fn key(&self) -> &str {
        match self {
            DesiredCommand::PtzMove { .. } | DesiredCommand::PtzHome => keys::PTZ_CONTROL,
            DesiredCommand::Snapshot => keys::SNAPSHOT,
            DesiredCommand::SetPreset(_) => keys::SET_PRESET,
            DesiredCommand::GetPresets => keys::GET_PRESETS,
            DesiredCommand::GotoPreset(_) => keys::GOTO_PRESET,
            DesiredCommand::RemovePreset(_) => keys::REMOVE_PRESET,
            DesiredCommand::SetHomePosition => keys::SET_HOME_POSITION,
            DesiredCommand::GotoHomePosition => keys::GOTO_HOME_POSITION,
            DesiredCommand::TimeCalibration => keys::TIME_CALIBRATION,
            DesiredCommand::Unknown(key) => key,
        }
    }
}

/// 解码错误。
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid shadow payload: {0}")]
    Payload(String),
    #[error("unexpected value for {key}: {detail}")]
    Shape { key: String, detail: String },
}

impl DecodeError {
    fn shape(key: &str, detail: impl Into<String>) -> Self {
        Self::Shape {
            key: key.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

/// 把 desired 映射解码为命令列表。
///
/// `PTZControl`、`Angle`、`Zoom` 共享同一个分发目标，无论出现几个键都只产生一条
/// 云台命令。其余键各自独立解码，顺序不作保证。
pub fn decode_desired(desired: &Map<String, Value>) -> Result<Vec<DesiredCommand>, DecodeError> {
    let mut commands = Vec::with_capacity(desired.len());
    let mut ptz_seen = false;
    for (key, value) in desired {
        let command = match key.as_str() {
            keys::PTZ_CONTROL | keys::ANGLE | keys::ZOOM => {
                if ptz_seen {
                    continue;
                }
                ptz_seen = true;
                decode_ptz(desired)?
            }
            keys::SNAPSHOT => DesiredCommand::Snapshot,
            keys::SET_PRESET => DesiredCommand::SetPreset(decode_preset(key, value)?),
            keys::GET_PRESETS => DesiredCommand::GetPresets,
            keys::GOTO_PRESET => DesiredCommand::GotoPreset(decode_preset(key, value)?),
            keys::REMOVE_PRESET => DesiredCommand::RemovePreset(decode_preset(key, value)?),
            keys::SET_HOME_POSITION => DesiredCommand::SetHomePosition,
            keys::GOTO_HOME_POSITION => DesiredCommand::GotoHomePosition,
            keys::TIME_CALIBRATION => DesiredCommand::TimeCalibration,
            _ => DesiredCommand::Unknown(key.clone()),
        };
        commands.push(command);
    }
    Ok(commands)
}

fn decode_ptz(desired: &Map<String, Value>) -> Result<DesiredCommand, DecodeError> {
    let selector = match desired.get(keys::PTZ_CONTROL) {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value.clone()),
        Some(Value::Number(value)) if value.is_i64() || value.is_u64() => Some(value.to_string()),
        Some(other) => {
            return Err(DecodeError::shape(
                keys::PTZ_CONTROL,
                format!("expected selector string, got {}", other),
            ));
        }
    };
    if selector.as_deref() == Some(HOME_SENTINEL) {
        return Ok(DesiredCommand::PtzHome);
    }

    let angle = decode_angle(desired.get(keys::ANGLE))?;
    let vector = match decode_zoom(desired.get(keys::ZOOM))? {
        // 缩放时不做转向
        Some(zoom) => MoveVector::new(0, 0, zoom),
        None => selector
            .as_deref()
            .map(MoveVector::from_selector)
            .unwrap_or_default(),
    };
    Ok(DesiredCommand::PtzMove { vector, angle })
}

fn decode_angle(value: Option<&Value>) -> Result<f64, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(DEFAULT_ANGLE),
        Some(Value::Number(number)) => {
            let speed = number.as_f64().unwrap_or_default();
            // 1: 22.5°  2: 45°  3: 90°  4: 180°
            if [1.0, 2.0, 3.0, 4.0].contains(&speed) {
                Ok(speed / 90.0)
            } else {
                Ok(DEFAULT_ANGLE)
            }
        }
        Some(other) => Err(DecodeError::shape(
            keys::ANGLE,
            format!("expected number, got {}", other),
        )),
    }
}

fn decode_zoom(value: Option<&Value>) -> Result<Option<i8>, DecodeError> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(value)) => value.trim().parse::<i64>().map_err(|_| {
            DecodeError::shape(keys::ZOOM, format!("expected integer string, got {:?}", value))
        })?,
        Some(Value::Number(number)) => number.as_i64().ok_or_else(|| {
            DecodeError::shape(keys::ZOOM, format!("expected integer, got {}", number))
        })?,
        Some(other) => {
            return Err(DecodeError::shape(
                keys::ZOOM,
                format!("expected integer, got {}", other),
            ));
        }
    };
    Ok(Some(raw.signum() as i8))
}

fn decode_preset(key: &str, value: &Value) -> Result<PresetToken, DecodeError> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(value) => value.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .and_then(PresetToken::from_number)
        .ok_or_else(|| DecodeError::shape(key, format!("expected preset number, got {}", value)))
}
