//! 设备影子报文。
//!
//! - `RequestTwins`：桥接服务发往影子服务的请求（reported 更新等）
//! - `ResponseTwins`：影子服务下发的 desired 增量（携带 command_id）

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 影子请求方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwinMethod {
    Update,
    Get,
    Delete,
    Control,
}

/// 影子中的状态：reported 为设备已确认值，desired 为云端期望值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Map::is_empty"
    )]
    pub reported: Map<String, Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Map::is_empty"
    )]
    pub desired: Map<String, Value>,
}

/// 上行影子请求。每次回报都重新构造，序列化后不再修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTwins {
    pub method: TwinMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: i64,
}

impl RequestTwins {
    /// 单字段 reported 更新（method=update, version=1）。
    pub fn reported_update(key: impl Into<String>, value: Value) -> Self {
        let mut reported = Map::new();
        reported.insert(key.into(), value);
        Self {
            method: TwinMethod::Update,
            state: Some(State {
                reported,
                desired: Map::new(),
            }),
            version: 1,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// `null` 与缺省字段一样按零值处理。
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 更新失败时的错误信息。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, rename = "errorcode")]
    pub error_code: String,
    #[serde(default, rename = "errormessage")]
    pub error_message: String,
}

/// 元数据时间戳。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: i64,
}

/// 影子元数据。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub reported: BTreeMap<String, Meta>,
    #[serde(default)]
    pub desired: BTreeMap<String, Meta>,
}

/// 下行报文负载。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub content: Content,
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: State,
    #[serde(default, rename = "meta_data", deserialize_with = "null_as_default")]
    pub metadata: Metadata,
}

/// 下行命令报文。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTwins {
    #[serde(default)]
    pub method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payload: Payload,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub version: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub command_id: String,
}

impl ResponseTwins {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn desired(&self) -> &Map<String, Value> {
        &self.payload.state.desired
    }

    pub fn has_command_id(&self) -> bool {
        !self.command_id.is_empty()
    }
}
