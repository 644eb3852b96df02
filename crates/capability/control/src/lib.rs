//! 控制链路：影子命令分发、异步结果回报与摄像头健康检查。

mod dispatcher;
mod health;
mod reporter;

pub use dispatcher::{CommandDispatcher, Dispatched, DispatcherSettings, spawn_dispatch_worker};
pub use health::{CAMERA_OFFLINE, CAMERA_ONLINE, HealthCheck};
pub use reporter::CompletionReporter;

use bridge_device::DeviceError;
use bridge_ingest::TransportError;
use bridge_rpc::RpcError;
use domain::DecodeError;

/// 快照上传未拿到文件标识时回报的固定值。
pub const SNAPSHOT_UPLOAD_FAILED: &str = "快照上传异常";

/// 单条入站报文的处理错误。
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("device resolution error: {0}")]
    Resolution(#[from] RpcError),
    #[error("{operation} failed: {source}")]
    Execution {
        operation: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error("report error: {0}")]
    Report(#[from] ReportError),
}

/// reported 状态回报错误。
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("publish error: {0}")]
    Publish(#[from] TransportError),
    #[error("command state update error: {0}")]
    State(#[from] RpcError),
}
