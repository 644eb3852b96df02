//! `api.Internal` / `api.Manager` 服务用到的消息。

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetDeviceRequest {
    #[prost(string, tag = "1")]
    pub did: String,
    #[prost(bool, tag = "2")]
    pub offline: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetDeviceResponse {
    #[prost(int32, tag = "1")]
    pub tid: i32,
    #[prost(int32, tag = "2")]
    pub pid: i32,
    #[prost(string, tag = "3")]
    pub did: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateCommandStateRequest {
    #[prost(string, tag = "1")]
    pub cid: String,
    /// `ACK` / `SUCCESS` / `FAILED` / `TIMEOUT`
    #[prost(string, tag = "2")]
    pub state: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateCommandStateResponse {}

pub const GET_DEVICE_PATH: &str = "/api.Internal/GetDevice";
pub const UPDATE_COMMAND_STATE_PATH: &str = "/api.Manager/UpdateCommandState";
